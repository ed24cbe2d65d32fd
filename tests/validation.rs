use proptest::prelude::*;
use table_delta::TableError;
use table_delta::constants::MAX_LARGE_TEXT_CHARACTERS;
use table_delta::schema::{ColumnModel, ColumnType, format_double};
use table_delta::validate::{validate_row_value, validate_value};

fn column(column_type: ColumnType) -> ColumnModel {
    ColumnModel::new("1", "c", column_type)
}

#[test]
fn booleans_are_lowercased() {
    let boolean = column(ColumnType::Boolean);
    assert_eq!(validate_value("TRUE", &boolean).unwrap(), "true");
    assert_eq!(validate_value("False", &boolean).unwrap(), "false");
    assert!(validate_value("yes", &boolean).is_err());
}

#[test]
fn integers_must_fit_in_64_bits() {
    let integer = column(ColumnType::Integer);
    assert_eq!(validate_value("-42", &integer).unwrap(), "-42");
    assert_eq!(
        validate_value("9223372036854775807", &integer).unwrap(),
        "9223372036854775807"
    );
    assert!(validate_value("9223372036854775808", &integer).is_err());
    assert!(validate_value("1.0", &integer).is_err());
    assert!(validate_value("12", &column(ColumnType::UserId)).is_ok());
}

#[test]
fn doubles_use_canonical_text() {
    let double = column(ColumnType::Double);
    let canonical = |value: &str| validate_value(value, &double).unwrap();
    assert_eq!(canonical("nan"), "NaN");
    assert_eq!(canonical("+inf"), "Infinity");
    assert_eq!(canonical("-\u{221E}"), "-Infinity");
    assert_eq!(canonical("INFINITY"), "Infinity");
    assert_eq!(canonical("1.5"), "1.5");
    assert_eq!(canonical("-1.3e16"), "-1.3e16");
    assert_eq!(canonical("0.0001"), "1e-4");
    assert!(validate_value("one", &double).is_err());
    assert_eq!(format_double(0.0), "0");
}

#[test]
fn dates_become_epoch_millis() {
    let date = column(ColumnType::Date);
    assert_eq!(validate_value("1577836800000", &date).unwrap(), "1577836800000");
    assert_eq!(validate_value("2020-01-01", &date).unwrap(), "1577836800000");
    assert_eq!(
        validate_value("2020-01-01 00:00:01.500", &date).unwrap(),
        "1577836801500"
    );
    assert_eq!(
        validate_value("2020-01-01T00:01:00", &date).unwrap(),
        "1577836860000"
    );
    assert!(validate_value("01/02/2020", &date).is_err());
}

#[test]
fn entity_ids_keep_their_form() {
    let entity = column(ColumnType::EntityId);
    assert_eq!(validate_value("syn123.4", &entity).unwrap(), "syn123.4");
    let err = validate_value("123", &entity).expect_err("missing prefix");
    assert!(matches!(err, TableError::ValueValidation { column_type: ColumnType::EntityId, .. }));
}

#[test]
fn large_text_is_capped_by_character_count() {
    let large = column(ColumnType::LargeText);
    let at_limit = "é".repeat(MAX_LARGE_TEXT_CHARACTERS);
    assert_eq!(validate_value(&at_limit, &large).unwrap(), at_limit);

    let over_limit = "é".repeat(MAX_LARGE_TEXT_CHARACTERS + 1);
    let err = validate_value(&over_limit, &large).expect_err("one character over");
    assert!(matches!(
        err,
        TableError::ValueValidation {
            column_type: ColumnType::LargeText,
            ..
        }
    ));
    assert!(err.to_string().contains(&MAX_LARGE_TEXT_CHARACTERS.to_string()));
}

#[test]
fn row_values_fall_back_to_defaults() {
    let integer = column(ColumnType::Integer).with_default_value("7");
    assert_eq!(
        validate_row_value(Some(""), &integer, 2, 3).unwrap().as_deref(),
        Some("7")
    );
    let err = validate_row_value(Some("x"), &integer, 2, 3).expect_err("bad integer");
    assert_eq!(
        err.to_string(),
        "Value at [2,3] was not a valid INTEGER. For input string: \"x\""
    );
}

#[test]
fn column_models_validate_their_attributes() {
    assert!(column(ColumnType::String).validate().is_err());
    assert!(column(ColumnType::String).with_maximum_size(1001).validate().is_err());
    column(ColumnType::String).with_maximum_size(1000).validate().expect("valid");
    assert!(column(ColumnType::Integer).with_default_value("x").validate().is_err());
    assert!(column(ColumnType::Boolean).with_enum_values(["maybe"]).validate().is_err());
    assert!(ColumnModel::new("abc", "c", ColumnType::Integer).validate().is_err());
}

proptest! {
    #[test]
    fn string_length_decides_acceptance(value in "[a-zé😀 ]{0,30}", size in 1i64..30) {
        let string = column(ColumnType::String).with_maximum_size(size);
        let length = value.chars().count() as i64;
        let result = validate_value(&value, &string);
        if length <= size {
            prop_assert_eq!(result.unwrap(), value);
        } else {
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn enum_values_restrict_strings(value in "[a-d]{1,2}") {
        let string = column(ColumnType::String)
            .with_maximum_size(5)
            .with_enum_values(["a", "bb", "c"]);
        let allowed = ["a", "bb", "c"].contains(&value.as_str());
        prop_assert_eq!(validate_value(&value, &string).is_ok(), allowed);
    }

    #[test]
    fn integer_canonical_form_round_trips(value in any::<i64>()) {
        let integer = column(ColumnType::Integer);
        prop_assert_eq!(validate_value(&value.to_string(), &integer).unwrap(), value.to_string());
    }
}
