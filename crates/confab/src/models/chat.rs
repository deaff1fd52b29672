use serde::{Deserialize, Serialize};

/// A conversation container. The title stays empty until the title generator
/// succeeds for the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

impl Chat {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Chat {
            id: id.into(),
            title: String::new(),
        }
    }
}
