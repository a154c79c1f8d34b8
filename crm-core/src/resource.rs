//! Resource kinds and their declared scoping and filter schema.
//!
//! Every collection exposed by the backend is listed here together with:
//! - whether it is tenant-scoped (carries `organizationId`)
//! - its owner field, if rows are attributed to one user
//! - the filters and sort keys a caller may use on it

use std::fmt;
use std::str::FromStr;

use crate::errors::CrmError;

/// Column every tenant-scoped row carries.
pub const ORGANIZATION_FIELD: &str = "organizationId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Leads,
    Campaigns,
    Workflows,
    Activities,
    Messages,
    SavedReports,
    Notifications,
    Tasks,
    Notes,
    LeadScoringModels,
    Users,
    CampaignTemplates,
}

/// How the owner field of an owned kind is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Always the user who created the row; immutable afterwards.
    Creator,
    /// Managers and admins may assign any user of their organization.
    Assignable,
    /// The row is the user itself (`users.id`).
    SelfRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerField {
    pub field: &'static str,
    pub ownership: Ownership,
}

/// A column pointing at a row of another kind. A USER sees rows of an unowned
/// kind only through the related row they own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation {
    pub field: &'static str,
    /// Relation name in a rendered `where` document.
    pub name: &'static str,
    pub kind: ResourceKind,
}

/// What a reference column points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTarget {
    User,
    Record(ResourceKind),
}

/// Columns that carry ids of other rows. Client writes to any of them are
/// checked against the writer's organization and visibility.
pub const REFERENCES: &[(&str, ReferenceTarget)] = &[
    ("userId", ReferenceTarget::User),
    ("assignedToId", ReferenceTarget::User),
    ("createdById", ReferenceTarget::User),
    ("authorId", ReferenceTarget::User),
    ("leadId", ReferenceTarget::Record(ResourceKind::Leads)),
    ("campaignId", ReferenceTarget::Record(ResourceKind::Campaigns)),
];

/// Shape of the value a filter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterValue {
    /// One of a closed set of uppercase values.
    Enum(&'static [&'static str]),
    Text,
    Flag,
    Number,
    Timestamp,
}

/// What the filter does with the parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
    /// Case-insensitive substring match across the listed columns.
    Search(&'static [&'static str]),
    AtLeast,
    AtMost,
    After,
    Before,
}

/// One allowed filter key for a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSpec {
    pub key: &'static str,
    pub field: &'static str,
    pub op: FilterOp,
    pub value: FilterValue,
}

const fn eq(key: &'static str, value: FilterValue) -> FilterSpec {
    FilterSpec { key, field: key, op: FilterOp::Equals, value }
}

const fn search(columns: &'static [&'static str]) -> FilterSpec {
    FilterSpec { key: "search", field: "search", op: FilterOp::Search(columns), value: FilterValue::Text }
}

const fn range(key: &'static str, field: &'static str, op: FilterOp, value: FilterValue) -> FilterSpec {
    FilterSpec { key, field, op, value }
}

const CREATED_AFTER: FilterSpec = range("createdAfter", "createdAt", FilterOp::After, FilterValue::Timestamp);
const CREATED_BEFORE: FilterSpec = range("createdBefore", "createdAt", FilterOp::Before, FilterValue::Timestamp);

const LEAD_STATUS: &[&str] = &["NEW", "CONTACTED", "QUALIFIED", "PROPOSAL", "NEGOTIATION", "WON", "LOST"];
const CAMPAIGN_STATUS: &[&str] = &["DRAFT", "SCHEDULED", "ACTIVE", "PAUSED", "COMPLETED", "CANCELLED"];
const CAMPAIGN_TYPE: &[&str] = &["EMAIL", "SMS", "PHONE", "SOCIAL"];
const WORKFLOW_TRIGGER: &[&str] = &[
    "LEAD_CREATED",
    "LEAD_STATUS_CHANGED",
    "LEAD_ASSIGNED",
    "CAMPAIGN_COMPLETED",
    "EMAIL_OPENED",
    "TIME_BASED",
    "SCORE_THRESHOLD",
    "TAG_ADDED",
    "MANUAL",
];
const ACTIVITY_TYPE: &[&str] = &[
    "EMAIL_SENT",
    "EMAIL_OPENED",
    "EMAIL_CLICKED",
    "SMS_SENT",
    "SMS_DELIVERED",
    "CALL_MADE",
    "CALL_RECEIVED",
    "MEETING_SCHEDULED",
    "MEETING_COMPLETED",
    "NOTE_ADDED",
    "STATUS_CHANGED",
    "STAGE_CHANGED",
    "LEAD_CREATED",
    "LEAD_ASSIGNED",
    "CAMPAIGN_LAUNCHED",
    "CAMPAIGN_COMPLETED",
];
const MESSAGE_TYPE: &[&str] = &["EMAIL", "SMS", "CALL", "SOCIAL", "NEWSLETTER"];
const MESSAGE_DIRECTION: &[&str] = &["INBOUND", "OUTBOUND"];
const MESSAGE_STATUS: &[&str] = &["PENDING", "SENT", "DELIVERED", "FAILED", "BOUNCED", "OPENED", "CLICKED"];
const TASK_STATUS: &[&str] = &["PENDING", "IN_PROGRESS", "COMPLETED", "CANCELLED"];
const TASK_PRIORITY: &[&str] = &["LOW", "MEDIUM", "HIGH", "URGENT"];
const ROLES: &[&str] = &["ADMIN", "MANAGER", "USER"];

const LEAD_FILTERS: &[FilterSpec] = &[
    eq("status", FilterValue::Enum(LEAD_STATUS)),
    eq("source", FilterValue::Text),
    search(&["name", "email", "company"]),
    range("minScore", "score", FilterOp::AtLeast, FilterValue::Number),
    range("maxScore", "score", FilterOp::AtMost, FilterValue::Number),
    range("minValue", "value", FilterOp::AtLeast, FilterValue::Number),
    range("maxValue", "value", FilterOp::AtMost, FilterValue::Number),
    CREATED_AFTER,
    CREATED_BEFORE,
];

const CAMPAIGN_FILTERS: &[FilterSpec] = &[
    eq("status", FilterValue::Enum(CAMPAIGN_STATUS)),
    eq("type", FilterValue::Enum(CAMPAIGN_TYPE)),
    search(&["name", "subject"]),
    CREATED_AFTER,
    CREATED_BEFORE,
];

const WORKFLOW_FILTERS: &[FilterSpec] = &[
    eq("isActive", FilterValue::Flag),
    eq("triggerType", FilterValue::Enum(WORKFLOW_TRIGGER)),
    search(&["name", "description"]),
];

const ACTIVITY_FILTERS: &[FilterSpec] = &[
    eq("type", FilterValue::Enum(ACTIVITY_TYPE)),
    eq("leadId", FilterValue::Text),
    eq("campaignId", FilterValue::Text),
    CREATED_AFTER,
    CREATED_BEFORE,
];

const MESSAGE_FILTERS: &[FilterSpec] = &[
    eq("type", FilterValue::Enum(MESSAGE_TYPE)),
    eq("direction", FilterValue::Enum(MESSAGE_DIRECTION)),
    eq("status", FilterValue::Enum(MESSAGE_STATUS)),
    eq("leadId", FilterValue::Text),
    search(&["subject", "body"]),
    CREATED_AFTER,
    CREATED_BEFORE,
];

const SAVED_REPORT_FILTERS: &[FilterSpec] = &[eq("type", FilterValue::Text), search(&["name", "description"])];

const NOTIFICATION_FILTERS: &[FilterSpec] = &[
    eq("read", FilterValue::Flag),
    eq("type", FilterValue::Text),
    CREATED_AFTER,
    CREATED_BEFORE,
];

const TASK_FILTERS: &[FilterSpec] = &[
    eq("status", FilterValue::Enum(TASK_STATUS)),
    eq("priority", FilterValue::Enum(TASK_PRIORITY)),
    eq("leadId", FilterValue::Text),
    range("dueAfter", "dueDate", FilterOp::After, FilterValue::Timestamp),
    range("dueBefore", "dueDate", FilterOp::Before, FilterValue::Timestamp),
    search(&["title", "description"]),
];

const NOTE_FILTERS: &[FilterSpec] = &[eq("leadId", FilterValue::Text), search(&["content"])];

const SCORING_MODEL_FILTERS: &[FilterSpec] = &[eq("isActive", FilterValue::Flag), search(&["name"])];

const USER_FILTERS: &[FilterSpec] = &[
    eq("role", FilterValue::Enum(ROLES)),
    search(&["firstName", "lastName", "email"]),
];

const TEMPLATE_FILTERS: &[FilterSpec] = &[eq("category", FilterValue::Text), search(&["name", "description"])];

impl ResourceKind {
    pub const ALL: [ResourceKind; 12] = [
        ResourceKind::Leads,
        ResourceKind::Campaigns,
        ResourceKind::Workflows,
        ResourceKind::Activities,
        ResourceKind::Messages,
        ResourceKind::SavedReports,
        ResourceKind::Notifications,
        ResourceKind::Tasks,
        ResourceKind::Notes,
        ResourceKind::LeadScoringModels,
        ResourceKind::Users,
        ResourceKind::CampaignTemplates,
    ];

    /// Collection name, also used as the REST path segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Leads => "leads",
            ResourceKind::Campaigns => "campaigns",
            ResourceKind::Workflows => "workflows",
            ResourceKind::Activities => "activities",
            ResourceKind::Messages => "messages",
            ResourceKind::SavedReports => "saved-reports",
            ResourceKind::Notifications => "notifications",
            ResourceKind::Tasks => "tasks",
            ResourceKind::Notes => "notes",
            ResourceKind::LeadScoringModels => "lead-scoring-models",
            ResourceKind::Users => "users",
            ResourceKind::CampaignTemplates => "campaign-templates",
        }
    }

    /// Global catalogs are shared by every organization.
    pub fn is_tenant_scoped(&self) -> bool {
        !matches!(self, ResourceKind::CampaignTemplates)
    }

    pub fn owner(&self) -> Option<OwnerField> {
        let (field, ownership) = match self {
            ResourceKind::Leads | ResourceKind::Tasks => ("assignedToId", Ownership::Assignable),
            ResourceKind::Notifications => ("userId", Ownership::Assignable),
            ResourceKind::Campaigns => ("createdById", Ownership::Creator),
            ResourceKind::Activities | ResourceKind::SavedReports => ("userId", Ownership::Creator),
            ResourceKind::Notes => ("authorId", Ownership::Creator),
            ResourceKind::Users => ("id", Ownership::SelfRecord),
            ResourceKind::Workflows
            | ResourceKind::Messages
            | ResourceKind::LeadScoringModels
            | ResourceKind::CampaignTemplates => return None,
        };
        Some(OwnerField { field, ownership })
    }

    pub fn owner_field(&self) -> Option<&'static str> {
        self.owner().map(|o| o.field)
    }

    /// Messages follow their lead; a message without a lead stays visible
    /// to the whole organization.
    pub fn relation(&self) -> Option<Relation> {
        match self {
            ResourceKind::Messages => Some(Relation {
                field: "leadId",
                name: "lead",
                kind: ResourceKind::Leads,
            }),
            _ => None,
        }
    }

    pub fn filters(&self) -> &'static [FilterSpec] {
        match self {
            ResourceKind::Leads => LEAD_FILTERS,
            ResourceKind::Campaigns => CAMPAIGN_FILTERS,
            ResourceKind::Workflows => WORKFLOW_FILTERS,
            ResourceKind::Activities => ACTIVITY_FILTERS,
            ResourceKind::Messages => MESSAGE_FILTERS,
            ResourceKind::SavedReports => SAVED_REPORT_FILTERS,
            ResourceKind::Notifications => NOTIFICATION_FILTERS,
            ResourceKind::Tasks => TASK_FILTERS,
            ResourceKind::Notes => NOTE_FILTERS,
            ResourceKind::LeadScoringModels => SCORING_MODEL_FILTERS,
            ResourceKind::Users => USER_FILTERS,
            ResourceKind::CampaignTemplates => TEMPLATE_FILTERS,
        }
    }

    /// Columns accepted by `sortBy`; the first one is the default.
    pub fn sort_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Leads => &["createdAt", "updatedAt", "score", "value", "name"],
            ResourceKind::Campaigns => &["createdAt", "updatedAt", "startDate", "name", "sent", "opened"],
            ResourceKind::Messages => &["createdAt", "sentAt", "readAt"],
            ResourceKind::Tasks => &["createdAt", "updatedAt", "dueDate", "priority", "title"],
            ResourceKind::Users => &["createdAt", "email", "lastName"],
            _ => &["createdAt", "updatedAt", "name"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CrmError::not_found(format!("Unknown resource '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_path_segment() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("invoices".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn no_filter_targets_a_scope_column() {
        for kind in ResourceKind::ALL {
            for spec in kind.filters() {
                assert_ne!(spec.field, ORGANIZATION_FIELD, "{kind} exposes organizationId");
                assert_ne!(Some(spec.field), kind.owner_field(), "{kind} exposes its owner");
                if let FilterOp::Search(columns) = spec.op {
                    assert!(!columns.contains(&ORGANIZATION_FIELD));
                }
            }
        }
    }

    #[test]
    fn relations_point_at_owned_kinds() {
        for kind in ResourceKind::ALL {
            if let Some(relation) = kind.relation() {
                assert!(kind.owner().is_none(), "{kind} has both an owner and a relation");
                assert!(relation.kind.owner_field().is_some());
            }
        }
    }

    #[test]
    fn only_the_template_catalog_is_global() {
        let global: Vec<_> = ResourceKind::ALL.iter().filter(|k| !k.is_tenant_scoped()).collect();
        assert_eq!(global, vec![&ResourceKind::CampaignTemplates]);
    }
}
