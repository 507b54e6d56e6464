//! Status enums mapping to SMALLINT lookup tables.
//!
//! Each variant's discriminant matches the seed data order (1-based) in
//! the corresponding `*_statuses` table, and each variant carries the
//! lowercase name used in API payloads and ledger log messages.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Lowercase name of the status.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok(Self::$variant), )+
                    other => Err(crate::error::CoreError::Validation(format!(
                        "Unknown {}: {other}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

define_status_enum! {
    /// Lifecycle status of a job ledger row.
    JobStatus {
        Pending = 1 => "pending",
        Active = 2 => "active",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
        Recovered = 5 => "recovered",
    }
}

impl JobStatus {
    /// Completed and failed rows accept no heartbeat or recovery mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses the recovery sweep inspects for stalls. A `recovered` row
    /// whose re-enqueue failed stays here until the enqueue succeeds.
    pub fn is_sweepable(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Active | JobStatus::Recovered
        )
    }

    /// Statuses the sweep may compare-and-set into `recovered`.
    pub fn is_recoverable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Active)
    }
}
