use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: sqlx::types::Json<Vec<String>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoleDisplay {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub permission_count: usize,
}

impl From<Role> for RoleDisplay {
    fn from(role: Role) -> Self {
        let permissions = role.permissions.0;
        Self {
            id: role.id,
            name: role.name,
            description: role.description.unwrap_or_default(),
            permission_count: permissions.len(),
            permissions,
            is_active: role.is_active,
            created_at: role.created_at,
            updated_at: role.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserWithRoles {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub is_locked: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub roles: Vec<RoleDisplay>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Permission {
    pub key: String,
    pub name: String,
    pub description: String,
    pub category: String,
}

// (resource, category label) for every module guarded by read/write permissions
const MODULES: &[(&str, &str)] = &[
    ("products", "Products"),
    ("inventory", "Inventory"),
    ("customers", "Customers"),
    ("orders", "Orders"),
    ("deliveries", "Deliveries"),
    ("sales", "Sales"),
    ("expenses", "Expenses"),
    ("finance", "Finance"),
    ("attendance", "Attendance"),
    ("payroll", "Payroll"),
    ("reports", "Reports"),
];

pub fn get_all_permissions() -> Vec<Permission> {
    let mut permissions = Vec::new();

    for (resource, category) in MODULES {
        permissions.push(Permission {
            key: format!("{}:read", resource),
            name: format!("View {}", category),
            description: format!("View {} records", category.to_lowercase()),
            category: category.to_string(),
        });
        if *resource != "reports" {
            permissions.push(Permission {
                key: format!("{}:write", resource),
                name: format!("Manage {}", category),
                description: format!("Create and edit {} records", category.to_lowercase()),
                category: category.to_string(),
            });
        }
    }

    // Team Management
    permissions.push(Permission {
        key: "team:read".to_string(),
        name: "View Team".to_string(),
        description: "View team members and their roles".to_string(),
        category: "Team Management".to_string(),
    });
    permissions.push(Permission {
        key: "team:write".to_string(),
        name: "Manage Team".to_string(),
        description: "Create, edit, lock and unlock user accounts".to_string(),
        category: "Team Management".to_string(),
    });
    permissions.push(Permission {
        key: "team:manage_roles".to_string(),
        name: "Manage Roles".to_string(),
        description: "Create, edit, and assign roles and permissions".to_string(),
        category: "Team Management".to_string(),
    });

    permissions
}

pub fn all_permission_keys() -> Vec<String> {
    get_all_permissions().into_iter().map(|p| p.key).collect()
}
