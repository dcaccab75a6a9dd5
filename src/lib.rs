pub mod dates;
pub mod project;
pub mod task;

use url::Url;

pub static DEFAULT_TICKTICK_HTML_URL: &str = "https://ticktick.com/webapp/";

/// Types with a browsable counterpart in the TickTick web application.
pub trait HasHtmlUrl {
    fn get_html_url(&self) -> Url;
}
