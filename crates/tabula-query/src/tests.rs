//! End-to-end scenarios: parse → compile → execute against a populated
//! database.

use tabula_core::{Database, Field, FieldKind, Item, Value};

use crate::{find, parse};

/// Three people: (["John","T.","Smith"], "j@x", 30), (["Bob"], "b@y", 22),
/// (["Eve","K"], "e@z", 47).
fn people_db() -> (Database, [Item; 3]) {
    let db = Database::open_memory().unwrap();
    let tx = db.begin().unwrap();
    tx.add_table(
        "Person",
        &[
            Field::new("Name", FieldKind::StringList),
            Field::new("Email", FieldKind::String),
            Field::new("Age", FieldKind::Int),
        ],
    )
    .unwrap();

    let rows: [(&[&str], &str, i64); 3] = [
        (&["John", "T.", "Smith"], "j@x", 30),
        (&["Bob"], "b@y", 22),
        (&["Eve", "K"], "e@z", 47),
    ];
    let mut items = [0; 3];
    for (i, (names, email, age)) in rows.into_iter().enumerate() {
        let item = tx.new_item("Person").unwrap();
        let names: Vec<Value> = names.iter().map(|n| Value::string(*n)).collect();
        tx.set("Person", item, "Name", &names).unwrap();
        tx.set("Person", item, "Email", &[Value::string(email)])
            .unwrap();
        tx.set("Person", item, "Age", &[Value::int(age)]).unwrap();
        items[i] = item;
    }
    tx.commit().unwrap();
    (db, items)
}

fn run(db: &Database, query: &str) -> Vec<Item> {
    let mut ids = find(db, &parse(query).unwrap(), None).unwrap();
    ids.sort_unstable();
    ids
}

#[test]
fn scalar_field_query() {
    let (db, items) = people_db();
    assert_eq!(run(&db, "Person Email=b@y"), vec![items[1]]);
}

#[test]
fn list_field_membership_is_existential() {
    let (db, items) = people_db();
    assert_eq!(run(&db, "Person Name=John"), vec![items[0]]);
    // "Smith" is one of three names of item 1.
    assert_eq!(run(&db, "Person Name=Smith"), vec![items[0]]);
}

#[test]
fn universal_quantifier_over_a_list() {
    let (db, items) = people_db();
    // Bob's single name lacks a T; John's "John" does too.
    assert_eq!(run(&db, "Person every Name=%T%"), Vec::<Item>::new());
    // Every name of the second item is exactly "Bob".
    assert_eq!(run(&db, "Person every Name=Bob"), vec![items[1]]);
}

#[test]
fn negative_quantifier_over_a_list() {
    let (db, items) = people_db();
    assert_eq!(
        run(&db, "Person no Name=Bob"),
        vec![items[0], items[2]]
    );
}

#[test]
fn boolean_composition_with_precedence() {
    let (db, items) = people_db();
    assert_eq!(
        run(&db, "Person Name=John and Email=j@x or Name=Eve"),
        vec![items[0], items[2]]
    );
}

#[test]
fn integer_fields_match_textually() {
    let (db, items) = people_db();
    assert_eq!(run(&db, "Person Age=22"), vec![items[1]]);
    assert_eq!(run(&db, "Person Age=2%"), vec![items[1]]);
}

#[test]
fn like_wildcards_reach_the_backend() {
    let (db, items) = people_db();
    assert_eq!(run(&db, "Person Name=J%"), vec![items[0]]);
    assert_eq!(run(&db, "Person Email=%@z"), vec![items[2]]);
}

#[test]
fn not_inverts_a_match() {
    let (db, items) = people_db();
    assert_eq!(
        run(&db, "Person not Email=b@y"),
        vec![items[0], items[2]]
    );
}

#[test]
fn quantifier_on_an_empty_list_is_vacuous() {
    let (db, expected) = people_db();
    let tx = db.begin().unwrap();
    let loner = tx.new_item("Person").unwrap();
    tx.set("Person", loner, "Email", &[Value::string("l@w")])
        .unwrap();
    tx.commit().unwrap();

    // An item with no names has no name equal to Bob, and vacuously all
    // of its names match anything.
    let mut ids = run(&db, "Person no Name=Bob");
    assert!(ids.contains(&loner));
    ids.retain(|id| *id != loner);
    assert_eq!(ids, vec![expected[0], expected[2]]);

    assert_eq!(run(&db, "Person every Name=Bob"), vec![expected[1], loner]);
}

#[test]
fn find_honours_the_limit() {
    let (db, _) = people_db();
    let ids = find(&db, &parse("Person Name=%").unwrap(), Some(2)).unwrap();
    assert_eq!(ids.len(), 2);
}

#[test]
fn parse_failure_reports_the_position() {
    let err = parse("Person Name=").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("1:13"), "position missing from: {msg}");
}
