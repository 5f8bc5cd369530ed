use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Operator role, stored as text in `users.role`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Admin,
    Supervisor,
    Operator,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Admin => "admin",
            StaffRole::Supervisor => "supervisor",
            StaffRole::Operator => "operator",
        }
    }
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StaffRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(StaffRole::Admin),
            "supervisor" => Ok(StaffRole::Supervisor),
            "operator" => Ok(StaffRole::Operator),
            _ => Err(anyhow::anyhow!("Invalid staff role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaffMember {
    pub name: String,
    pub phone: Option<String>,
    pub role: StaffRole,
    pub active: bool,
}

#[derive(sqlx::FromRow)]
struct StaffRow {
    name: String,
    phone: Option<String>,
    role: String,
    active: bool,
}

impl StaffMember {
    /// Active staff holding any of `roles`. Rows with an unrecognised role are skipped.
    pub async fn find_active_with_roles(roles: &[StaffRole], pool: &PgPool) -> Result<Vec<Self>> {
        let role_names: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();

        let rows = sqlx::query_as::<_, StaffRow>(
            r#"
            SELECT name, phone, role, active
            FROM users
            WHERE active = TRUE AND role = ANY($1)
            ORDER BY name
            "#,
        )
        .bind(&role_names)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let role = row.role.parse().ok()?;
                Some(StaffMember {
                    name: row.name,
                    phone: row.phone,
                    role,
                    active: row.active,
                })
            })
            .collect())
    }

    /// Phone number if present and non-blank.
    pub fn contact_phone(&self) -> Option<&str> {
        self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}
