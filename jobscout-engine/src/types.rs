//! Core domain enumerations
//!
//! Closed value sets from the canonical schema. All variants serialize as
//! snake_case strings, which is also their database representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

string_enum! {
    /// ATS vendor behind a company's careers page
    AtsType {
        Greenhouse => "greenhouse",
        Lever => "lever",
        Ashby => "ashby",
        Workday => "workday",
        Custom => "custom",
        Unknown => "unknown",
    }
}

impl AtsType {
    /// Vendors with a supported structured extractor (everything except
    /// custom/unknown).
    pub const VENDORS: &'static [AtsType] = &[
        AtsType::Greenhouse,
        AtsType::Lever,
        AtsType::Ashby,
        AtsType::Workday,
    ];

    /// A company with one of these ATS types must carry an identifier.
    pub fn requires_identifier(&self) -> bool {
        AtsType::VENDORS.contains(self)
    }
}

string_enum! {
    /// Coarse job-function category (closed set of 14 values)
    RoleFamily {
        SoftwareEngineering => "software_engineering",
        Infrastructure => "infrastructure",
        Data => "data",
        Product => "product",
        Design => "design",
        EngineeringManagement => "engineering_management",
        Sales => "sales",
        Marketing => "marketing",
        CustomerSuccess => "customer_success",
        Operations => "operations",
        People => "people",
        Finance => "finance",
        Legal => "legal",
        Other => "other",
    }
}

string_enum! {
    /// Seniority level (closed set of 9 values)
    Seniority {
        Intern => "intern",
        Junior => "junior",
        Mid => "mid",
        Senior => "senior",
        Staff => "staff",
        Principal => "principal",
        Director => "director",
        Vp => "vp",
        CLevel => "c_level",
    }
}

impl Seniority {
    /// Position on the ordered ladder, for one-step tolerance checks.
    pub fn rank(&self) -> i8 {
        Seniority::ALL.iter().position(|s| s == self).unwrap_or(0) as i8
    }
}

string_enum! {
    /// Where the work happens
    LocationType {
        Remote => "remote",
        Hybrid => "hybrid",
        Onsite => "onsite",
    }
}

string_enum! {
    /// Employment arrangement
    EmploymentType {
        FullTime => "full_time",
        PartTime => "part_time",
        Contract => "contract",
        Freelance => "freelance",
        Internship => "internship",
    }
}

string_enum! {
    /// Why a job left the active catalog
    DelistReason {
        RemovedFromAts => "removed_from_ats",
        PageNotFound => "page_not_found",
        CompanyInactive => "company_inactive",
    }
}

string_enum! {
    /// Terminal and non-terminal pipeline run states
    RunStatus {
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

string_enum! {
    /// Discovery queue item state machine
    QueueStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
        Review => "review",
    }
}

impl Default for QueueStatus {
    fn default() -> Self {
        QueueStatus::Pending
    }
}
