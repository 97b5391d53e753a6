use super::*;
use crate::message::DeliveryMode;

fn order() -> Message {
    let mut msg = Message::text("order");
    msg.set_property("color", "red").unwrap();
    msg.set_property("weight", 15i32).unwrap();
    msg.set_property("ratio", 0.5f64).unwrap();
    msg.set_property("urgent", true).unwrap();
    msg.set_property("code", "A_1%").unwrap();
    msg.set_jms_type(Some("purchase".to_string()));
    msg.header_mut().priority = 7;
    msg.header_mut().message_id = Some("ID:42".to_string());
    msg
}

fn eval(selector: &str, msg: &Message) -> Tri {
    Selector::parse(selector).unwrap().evaluate(msg)
}

#[test]
fn simple_comparisons() {
    let msg = order();
    assert_eq!(eval("color = 'red'", &msg), Tri::True);
    assert_eq!(eval("color <> 'red'", &msg), Tri::False);
    assert_eq!(eval("weight > 10 AND weight <= 15", &msg), Tri::True);
    assert_eq!(eval("weight = 15.0", &msg), Tri::True);
    assert_eq!(eval("ratio * 2 = 1", &msg), Tri::True);
    assert_eq!(eval("urgent", &msg), Tri::True);
    assert_eq!(eval("urgent = FALSE", &msg), Tri::False);
}

#[test]
fn keywords_are_case_insensitive() {
    let msg = order();
    assert_eq!(eval("color = 'red' and not weight between 1 and 5", &msg), Tri::True);
    assert_eq!(eval("Urgent = true", &msg), Tri::Unknown);
}

#[test]
fn missing_identifiers_are_unknown() {
    let msg = order();
    assert_eq!(eval("size = 3", &msg), Tri::Unknown);
    assert_eq!(eval("NOT (size = 3)", &msg), Tri::Unknown);
    assert_eq!(eval("size = 3 OR color = 'red'", &msg), Tri::True);
    assert_eq!(eval("size = 3 AND color = 'blue'", &msg), Tri::False);
    assert_eq!(eval("size + 1 > 0", &msg), Tri::Unknown);
    assert!(!Selector::parse("size = 3").unwrap().matches(&msg));
}

#[test]
fn unlike_types_compare_false() {
    let msg = order();
    assert_eq!(eval("color = 1", &msg), Tri::False);
    assert_eq!(eval("weight = 'heavy'", &msg), Tri::False);
    assert_eq!(eval("color > 1", &msg), Tri::False);
}

#[test]
fn arithmetic() {
    let msg = order();
    assert_eq!(eval("weight - 5 * 2 = 5", &msg), Tri::True);
    assert_eq!(eval("-weight < 0", &msg), Tri::True);
    assert_eq!(eval("weight / 2 = 7", &msg), Tri::True);
    assert_eq!(eval("weight / 0 = 1", &msg), Tri::Unknown);
    assert_eq!(eval("weight / 2.0 = 7.5", &msg), Tri::True);
}

#[test]
fn between_in_like_and_null() {
    let msg = order();
    assert_eq!(eval("weight BETWEEN 15 AND 20", &msg), Tri::True);
    assert_eq!(eval("weight NOT BETWEEN 15 AND 20", &msg), Tri::False);
    assert_eq!(eval("color IN ('green', 'red')", &msg), Tri::True);
    assert_eq!(eval("color NOT IN ('green', 'blue')", &msg), Tri::True);
    assert_eq!(eval("shade IN ('red')", &msg), Tri::Unknown);
    assert_eq!(eval("color LIKE 'r_d'", &msg), Tri::True);
    assert_eq!(eval("color LIKE 'r%'", &msg), Tri::True);
    assert_eq!(eval("color NOT LIKE '%e%'", &msg), Tri::False);
    assert_eq!(eval("code LIKE 'A\\_1\\%' ESCAPE '\\'", &msg), Tri::True);
    assert_eq!(eval("code LIKE 'AB1%' ESCAPE '!'", &msg), Tri::False);
    assert_eq!(eval("shade IS NULL", &msg), Tri::True);
    assert_eq!(eval("color IS NOT NULL", &msg), Tri::True);
    assert_eq!(eval("weight LIKE '1%'", &msg), Tri::False);
}

#[test]
fn header_identifiers() {
    let mut msg = order();
    assert_eq!(eval("JMSPriority > 5", &msg), Tri::True);
    assert_eq!(eval("JMSDeliveryMode = 'PERSISTENT'", &msg), Tri::True);
    assert_eq!(eval("JMSType = 'purchase'", &msg), Tri::True);
    assert_eq!(eval("JMSMessageID LIKE 'ID:%'", &msg), Tri::True);
    assert_eq!(eval("JMSCorrelationID IS NULL", &msg), Tri::True);
    assert_eq!(eval("JMSTimestamp = 0", &msg), Tri::True);

    msg.header_mut().delivery_mode = DeliveryMode::NonPersistent;
    assert_eq!(eval("JMSDeliveryMode = 'NON_PERSISTENT'", &msg), Tri::True);
}

#[test]
fn string_literals_escape_quotes() {
    let mut msg = Message::new();
    msg.set_property("name", "O'Brien").unwrap();
    assert_eq!(eval("name = 'O''Brien'", &msg), Tri::True);
}

#[test]
fn numeric_literal_forms() {
    let mut msg = Message::new();
    msg.set_property("n", 16i64).unwrap();
    assert_eq!(eval("n = 0x10", &msg), Tri::True);
    assert_eq!(eval("n = 020", &msg), Tri::True);
    assert_eq!(eval("n = 16L", &msg), Tri::True);
    assert_eq!(eval("n = 1.6e1", &msg), Tri::True);
    assert_eq!(eval("n < 16.5d", &msg), Tri::True);
}

#[test]
fn signed_and_uppercase_hex_literals() {
    let mut msg = Message::new();
    msg.set_property("low", i64::MIN).unwrap();
    msg.set_property("n", 16i64).unwrap();
    assert_eq!(eval("low = -9223372036854775808", &msg), Tri::True);
    assert_eq!(eval("low < -0x10", &msg), Tri::True);
    assert_eq!(eval("n + 15 = 0X1E+1", &msg), Tri::True);
    assert_eq!(eval("n-1 = 15", &msg), Tri::True);
    assert_eq!(eval("n - -1 = 17", &msg), Tri::True);
    assert_eq!(eval("(n)-2 = 14", &msg), Tri::True);
}

#[test]
fn rejects_invalid_syntax() {
    for source in [
        "1 = ",
        "color = 'red",
        "color =! 'red'",
        "(color = 'red'",
        "color IN (1, 2)",
        "color LIKE 'a' ESCAPE 'ab'",
        "color LIKE 'a!b' ESCAPE '!'",
        "3 IS NULL",
        "color = NULL",
        "color 'red'",
        "",
        "   ",
    ] {
        match Selector::parse(source) {
            Err(JmsError::InvalidSelector { selector, .. }) => assert_eq!(selector, source),
            other => panic!("{source:?} should be rejected, got {other:?}"),
        }
    }
}

#[test]
fn rejects_ill_typed_expressions() {
    for source in [
        "5",
        "'text'",
        "weight + 1",
        "NOT 3",
        "color = 'a' AND 4",
        "'a' < 'b'",
        "TRUE > FALSE",
        "'a' + 1 = 2",
        "1 = 'a'",
        "JMSPriority LIKE '1%'",
        "JMSType > 3",
        "weight BETWEEN 'a' AND 'z'",
    ] {
        assert!(
            matches!(Selector::parse(source), Err(JmsError::InvalidSelector { .. })),
            "{source:?} should be rejected"
        );
    }
}

#[test]
fn optional_selector() {
    assert!(Selector::optional(None).unwrap().is_none());
    assert!(Selector::optional(Some("  ")).unwrap().is_none());
    let selector = Selector::optional(Some("a = 1")).unwrap().unwrap();
    assert_eq!(selector.source(), "a = 1");
    assert!(Selector::optional(Some("a =")).is_err());
}

#[test]
fn accepts_without_selector() {
    let msg = order();
    assert!(accepts(None, &msg));
    let selector = Selector::parse("color = 'blue'").unwrap();
    assert!(!accepts(Some(&selector), &msg));
}

#[test]
fn three_valued_logic_tables() {
    use Tri::*;
    assert_eq!(Unknown.and(False), False);
    assert_eq!(Unknown.and(True), Unknown);
    assert_eq!(Unknown.or(True), True);
    assert_eq!(Unknown.or(False), Unknown);
    assert_eq!(Unknown.not(), Unknown);
}
