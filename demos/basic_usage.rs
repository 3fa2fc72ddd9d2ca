//! Basic usage example for TomeDb
//!
//! This example demonstrates the fundamental operations:
//! - Opening a database file
//! - Inserting documents into a collection
//! - Looking documents up by Id and by predicate
//! - Updating and deleting documents

use tomedb::{Bson, Database, Document, Options, ID_FIELD};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    // Configure database options
    let options = Options::default()
        .block_size(4 * 1024) // 4KB blocks
        .index_order(32);

    // Open the database file (created if it doesn't exist)
    let db = Database::open("./example.db", options)?;

    println!("Database opened successfully");

    let people = db.collection("people")?;

    // Insert some documents; every document needs an Id field
    println!("Inserting documents...");
    let mut alice = Document::new();
    alice.set(ID_FIELD, 1i64);
    alice.set("name", "Alice");
    alice.set("age", 30i64);
    people.insert(alice)?;

    let mut bob = Document::new();
    bob.set(ID_FIELD, 2i64);
    bob.set("name", "Bob");
    bob.set("age", 25i64);
    people.insert(bob)?;

    // Look up by primary key
    println!("Reading documents...");
    if let Some(person) = people.find_by_id(&Bson::Int64(1))? {
        println!("id 1 => {}", person);
    }

    // Query with a predicate
    let adults = people.find(|p| p.get("age").and_then(Bson::as_i64).unwrap_or(0) >= 30)?;
    for person in adults {
        println!("30 or older: {}", person?);
    }

    // Update a document in place
    println!("Updating Bob...");
    let mut bob = Document::new();
    bob.set(ID_FIELD, 2i64);
    bob.set("name", "Bob");
    bob.set("age", 26i64);
    people.update(bob)?;

    // Delete a document
    println!("Deleting Alice...");
    people.delete(&Bson::Int64(1))?;

    match people.find_by_id(&Bson::Int64(1))? {
        Some(_) => println!("id 1 still exists (unexpected)"),
        None => println!("id 1 was successfully deleted"),
    }

    println!("{} document(s) remain", people.count()?);

    // Close database
    db.close()?;
    println!("Database closed");

    Ok(())
}
