//! Secondary index example for TomeDb
//!
//! This example demonstrates:
//! - Creating secondary indexes, including a unique one
//! - Back-filling an index over existing documents
//! - Serving field queries from an index instead of a scan

use tomedb::{Bson, Database, Document, Options, ID_FIELD};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    let db = Database::open("./example_indexes.db", Options::default())?;
    let users = db.collection("users")?;

    // Populate the collection before any index exists
    println!("Inserting users...");
    for (id, name, email, team) in [
        (1i64, "Alice", "alice@example.com", "storage"),
        (2, "Bob", "bob@example.com", "query"),
        (3, "Carol", "carol@example.com", "storage"),
        (4, "Dave", "dave@example.com", "query"),
    ] {
        let mut doc = Document::new();
        doc.set(ID_FIELD, id);
        doc.set("name", name);
        doc.set("email", email);
        doc.set("team", team);
        users.insert(doc)?;
    }

    // A non-unique index on team: back-filled from the documents above
    println!("Indexing the team field...");
    users.ensure_index("team", false)?;

    let storage_team = users.find_by_field("team", &Bson::String("storage".into()))?;
    println!("storage team has {} member(s):", storage_team.len());
    for member in &storage_team {
        println!("  {}", member);
    }

    // A unique index on email: duplicate values are rejected
    println!("Indexing the email field (unique)...");
    users.ensure_index("email", true)?;

    let mut impostor = Document::new();
    impostor.set(ID_FIELD, 5i64);
    impostor.set("name", "Eve");
    impostor.set("email", "alice@example.com");
    match users.insert(impostor) {
        Err(e) => println!("duplicate email rejected: {}", e),
        Ok(()) => println!("duplicate email accepted (unexpected)"),
    }

    // Index maintenance is automatic: moving Dave re-files him
    println!("Moving Dave to the storage team...");
    let mut dave = Document::new();
    dave.set(ID_FIELD, 4i64);
    dave.set("name", "Dave");
    dave.set("email", "dave@example.com");
    dave.set("team", "storage");
    users.update(dave)?;

    let storage_team = users.find_by_field("team", &Bson::String("storage".into()))?;
    println!("storage team now has {} member(s)", storage_team.len());

    db.close()?;
    Ok(())
}
