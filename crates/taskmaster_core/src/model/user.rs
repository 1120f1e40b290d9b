use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default = "enabled")]
    pub email_notifications: bool,
    #[serde(default = "enabled")]
    pub desktop_notifications: bool,
}

fn enabled() -> bool {
    true
}
