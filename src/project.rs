use serde::{Deserialize, Serialize};
use url::Url;

use crate::{task::TickTickTask, HasHtmlUrl, DEFAULT_TICKTICK_HTML_URL};

/// Reserved project identifier for the user's default unsectioned project.
/// The TickTick API accepts it anywhere a project identifier is expected.
pub static INBOX_PROJECT_ID: &str = "inbox";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TickTickProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub view_mode: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

impl TickTickProject {
    pub fn is_closed(&self) -> bool {
        self.closed.unwrap_or(false)
    }
}

impl HasHtmlUrl for TickTickProject {
    fn get_html_url(&self) -> Url {
        format!("{}#p/{}/tasks", DEFAULT_TICKTICK_HTML_URL, self.id)
            .parse::<Url>()
            .unwrap()
    }
}

/// Response of the project data endpoint: a project together with its
/// undone tasks.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TickTickProjectData {
    pub project: TickTickProject,
    #[serde(default)]
    pub tasks: Vec<TickTickTask>,
}
