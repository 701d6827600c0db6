use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeId(pub String);

impl std::fmt::Display for ChangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a deferred change. `Pending` is the only non-terminal state;
/// once a record reaches `Approved` or `Rejected` it never transitions again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The closed set of mutating operations the workflow serves. Extending the
/// set is a deployment-level change, not a runtime one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    EmployeeRegistration,
    EmployeeUpdate,
    UnitRegistration,
    UnitUpdate,
    AttendanceMark,
    BulkUpload,
}

/// How an approved (or directly applied) payload lands on the target record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    /// Insert a new record; a document id is generated when none was given.
    Create,
    /// Merge into an existing record; the record must already exist.
    Update,
    /// Insert-or-merge at a fixed document id (attendance months).
    Upsert,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmployeeRegistration => "employee-registration",
            Self::EmployeeUpdate => "employee-update",
            Self::UnitRegistration => "unit-registration",
            Self::UnitUpdate => "unit-update",
            Self::AttendanceMark => "attendance-mark",
            Self::BulkUpload => "bulk-upload",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "employee-registration" => Some(Self::EmployeeRegistration),
            "employee-update" => Some(Self::EmployeeUpdate),
            "unit-registration" => Some(Self::UnitRegistration),
            "unit-update" => Some(Self::UnitUpdate),
            "attendance-mark" => Some(Self::AttendanceMark),
            "bulk-upload" => Some(Self::BulkUpload),
            _ => None,
        }
    }

    pub fn apply_mode(&self) -> ApplyMode {
        match self {
            Self::EmployeeRegistration | Self::UnitRegistration | Self::BulkUpload => {
                ApplyMode::Create
            }
            Self::EmployeeUpdate | Self::UnitUpdate => ApplyMode::Update,
            Self::AttendanceMark => ApplyMode::Upsert,
        }
    }

    /// Update-shaped operations cannot be addressed without a document id.
    pub fn requires_document_id(&self) -> bool {
        !matches!(self.apply_mode(), ApplyMode::Create)
    }
}

/// Where a mutation ultimately lands. A closed enum instead of runtime
/// collection-name formatting: every reachable collection is enumerable at
/// compile time, and the per-unit attendance naming lives in one place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetEntity {
    Employees,
    Units,
    Attendance { unit: String },
}

impl TargetEntity {
    /// Attendance collections are keyed per unit by a normalized slug.
    pub fn attendance(unit: &str) -> Self {
        Self::Attendance { unit: normalize_slug(unit) }
    }

    pub fn collection(&self) -> String {
        match self {
            Self::Employees => "employees".to_string(),
            Self::Units => "units".to_string(),
            Self::Attendance { unit } => format!("attendance_{unit}"),
        }
    }

    pub fn parse_collection(value: &str) -> Option<Self> {
        match value {
            "employees" => Some(Self::Employees),
            "units" => Some(Self::Units),
            other => other
                .strip_prefix("attendance_")
                .filter(|unit| !unit.is_empty())
                .map(|unit| Self::Attendance { unit: unit.to_string() }),
        }
    }
}

/// Lowercase, alphanumerics kept, everything else collapsed to single `_`.
fn normalize_slug(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_was_separator = true;
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_separator = false;
        } else if !last_was_separator {
            slug.push('_');
            last_was_separator = true;
        }
    }
    if slug.ends_with('_') {
        slug.pop();
    }
    slug
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAddress {
    pub entity: TargetEntity,
    /// Absent for pure creations; the apply step generates an id.
    pub document_id: Option<String>,
}

impl TargetAddress {
    pub fn new(entity: TargetEntity, document_id: Option<String>) -> Self {
        Self { entity, document_id }
    }

    pub fn collection(&self) -> String {
        self.entity.collection()
    }
}

/// One field-level difference between a stored record and a proposed payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

/// The `last_change` audit trail attached to a target record at apply time.
/// Computed once and overwritten by the next applied mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeTrail {
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    pub changes: Vec<FieldChange>,
}

/// A deferred mutating request awaiting review. Append-mostly: created once
/// by the interceptor, finalized exactly once by the approval controller,
/// never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: ChangeId,
    pub change_type: ChangeType,
    pub status: ChangeStatus,
    pub requested_by: String,
    /// Role snapshot at submission time; later role changes do not rewrite
    /// history.
    pub requested_by_role: String,
    pub requested_at: DateTime<Utc>,
    /// The proposed field set, captured verbatim. Write-once.
    pub change_data: Map<String, Value>,
    pub target: TargetAddress,
    pub description: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comments: Option<String>,
}
