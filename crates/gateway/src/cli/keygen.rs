//! `keygen`: mint a random API key and print it once, together with
//! the `[[api.keys]]` stanza to append to the config file. Only the
//! hash ever lands on disk.

use rand::RngCore;

use crate::api::auth::hash_key;

pub fn run(mud_name: &str, permissions: &[String]) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = hex::encode(bytes);
    let hash = hash_key(&key);

    println!("API key (shown once, store it securely):");
    println!("  {key}");
    println!();
    println!("Add to config.toml:");
    println!();
    println!("[[api.keys]]");
    println!("key_hash = \"{hash}\"");
    println!("mud_name = \"{mud_name}\"");
    let perms = permissions
        .iter()
        .map(|p| format!("\"{p}\""))
        .collect::<Vec<_>>()
        .join(", ");
    println!("permissions = [{perms}]");
}
