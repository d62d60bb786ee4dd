//! Users collection flow: store users with encrypted fields, find one by SSN.

use fieldvault::prelude::*;
use fieldvault_key_file::{FileKeyVault, FileMasterKey};
use serde_json::{json, Value};
use std::path::PathBuf;

const USERS: &str = "mydatabase.users";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("fieldvault users example");
    println!("========================\n");

    let schema = SchemaMap::new()
        .with_field(USERS, "ssn", Algorithm::Deterministic)
        .with_field(USERS, "creditCardNumber", Algorithm::Random);
    let config = EncryptionConfig::new(schema);

    // Master key and vault persist across runs
    let data_dir = PathBuf::from("./example_data");
    let master = FileMasterKey::new(data_dir.join("master.key"));
    let vault = FileKeyVault::open(data_dir.join("vault"), config.key_vault_namespace()).await?;

    let service = EncryptionService::new(config);
    if let EncryptionState::Failed(cause) = service.initialize(&master, vault).await {
        println!("Encryption unavailable: {cause}");
        return Ok(());
    }
    let encryptor = service.encryptor()?;
    println!("Data key: {}\n", encryptor.key_id());

    let mut collection = Vec::new();
    for (name, ssn, card) in [
        ("Alice", "123-45-6789", "4111-1111-1111-1111"),
        ("Bob", "987-65-4321", "5500-0000-0000-0004"),
    ] {
        let Value::Object(mut user) = json!({ "name": name, "ssn": ssn, "creditCardNumber": card })
        else {
            unreachable!()
        };
        encryptor.encrypt_document(USERS, &mut user)?;
        println!("Stored {name}: ssn = {}", user["ssn"]);
        collection.push(user);
    }

    let filter = encryptor.equality_filter(USERS, "ssn", "987-65-4321")?.to_base64();
    println!("\nLooking up ssn 987-65-4321");

    for stored in collection.iter().filter(|u| u["ssn"] == filter.as_str()) {
        let mut user = stored.clone();
        encryptor.decrypt_document(USERS, &mut user)?;
        println!("Found {}: card {}", user["name"], user["creditCardNumber"]);
    }

    Ok(())
}
