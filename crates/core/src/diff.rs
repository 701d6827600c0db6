//! Field-level diffing for audit trails.
//!
//! Each change type watches a fixed, ordered list of keys; fields outside the
//! list never appear in a diff. Values are compared through their canonical
//! string rendering, which tolerates representation drift between stored and
//! incoming values (a date object vs. its ISO string) at the cost of missing
//! semantically-equal-but-differently-rendered structures.

use serde_json::{Map, Value};

use crate::domain::change::{ChangeType, FieldChange};

const EMPLOYEE_KEYS: &[&str] = &[
    "name",
    "fatherName",
    "designation",
    "esicNumber",
    "uanNumber",
    "accountNumber",
    "ifsc",
    "basicSalary",
    "joiningDate",
    "status",
];

const UNIT_KEYS: &[&str] =
    &["unitName", "address", "contactPerson", "contactNumber", "gstNumber", "status"];

const ATTENDANCE_KEYS: &[&str] =
    &["employeeId", "month", "daysPresent", "daysAbsent", "overtimeHours", "remarks"];

const BULK_UPLOAD_KEYS: &[&str] = &["source", "period", "rowCount"];

/// The audit-relevant keys for one change type, in emission order.
pub fn watched_keys(change_type: ChangeType) -> &'static [&'static str] {
    match change_type {
        ChangeType::EmployeeRegistration | ChangeType::EmployeeUpdate => EMPLOYEE_KEYS,
        ChangeType::UnitRegistration | ChangeType::UnitUpdate => UNIT_KEYS,
        ChangeType::AttendanceMark => ATTENDANCE_KEYS,
        ChangeType::BulkUpload => BULK_UPLOAD_KEYS,
    }
}

/// Compare a proposed field set against an existing record over `watched`.
///
/// Deterministic and side-effect free; output order follows `watched`. Keys
/// absent from `proposed` are skipped, absent or null values on either side
/// compare as `null`.
pub fn diff_fields(
    existing: Option<&Map<String, Value>>,
    proposed: &Map<String, Value>,
    watched: &[&str],
) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for key in watched {
        let Some(proposed_value) = proposed.get(*key) else {
            continue;
        };
        let existing_value = existing.and_then(|fields| fields.get(*key));

        if stringify(existing_value) != stringify(Some(proposed_value)) {
            changes.push(FieldChange {
                field: (*key).to_string(),
                from: existing_value.cloned().unwrap_or(Value::Null),
                to: proposed_value.clone(),
            });
        }
    }

    changes
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{diff_fields, watched_keys};
    use crate::domain::change::ChangeType;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().expect("object literal").clone()
    }

    #[test]
    fn emits_only_differing_watched_fields_in_key_order() {
        let existing = fields(json!({
            "name": "B",
            "esicNumber": "123",
            "designation": "Operator",
        }));
        let proposed = fields(json!({
            "designation": "Supervisor",
            "name": "A",
            "esicNumber": "123",
        }));

        let changes =
            diff_fields(Some(&existing), &proposed, watched_keys(ChangeType::EmployeeUpdate));

        let fields: Vec<&str> = changes.iter().map(|change| change.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "designation"]);
        assert_eq!(changes[0].from, json!("B"));
        assert_eq!(changes[0].to, json!("A"));
    }

    #[test]
    fn fields_outside_the_watched_list_never_appear() {
        let existing = fields(json!({"name": "B", "internalNote": "x"}));
        let proposed = fields(json!({"name": "B", "internalNote": "y"}));

        let changes =
            diff_fields(Some(&existing), &proposed, watched_keys(ChangeType::EmployeeUpdate));

        assert!(changes.is_empty());
    }

    #[test]
    fn absent_record_diffs_every_proposed_watched_field_from_null() {
        let proposed = fields(json!({"name": "A", "esicNumber": "123"}));

        let changes = diff_fields(None, &proposed, watched_keys(ChangeType::EmployeeRegistration));

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|change| change.from == Value::Null));
    }

    #[test]
    fn numeric_and_string_renderings_of_the_same_value_compare_equal() {
        let existing = fields(json!({"daysPresent": 26}));
        let proposed = fields(json!({"daysPresent": "26"}));

        let changes =
            diff_fields(Some(&existing), &proposed, watched_keys(ChangeType::AttendanceMark));

        assert!(changes.is_empty());
    }

    #[test]
    fn null_proposed_value_clears_a_set_field() {
        let existing = fields(json!({"remarks": "late arrivals"}));
        let proposed = fields(json!({"remarks": null}));

        let changes =
            diff_fields(Some(&existing), &proposed, watched_keys(ChangeType::AttendanceMark));

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from, json!("late arrivals"));
        assert_eq!(changes[0].to, Value::Null);
    }

    #[test]
    fn diff_is_deterministic_across_calls() {
        let existing = fields(json!({"name": "B", "ifsc": "SBIN0001"}));
        let proposed = fields(json!({"name": "A", "ifsc": "SBIN0002", "basicSalary": 18000}));
        let watched = watched_keys(ChangeType::EmployeeUpdate);

        let first = diff_fields(Some(&existing), &proposed, watched);
        let second = diff_fields(Some(&existing), &proposed, watched);

        assert_eq!(first, second);
    }
}
