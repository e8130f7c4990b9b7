mod error;
mod page;
mod selector;
mod session;

pub use error::{BrowserError, BrowserResult};
pub use page::{ChromiumPage, PageHandle};
pub use selector::Selector;
pub use session::{
    ChromiumSession, ChromiumSessionFactory, LaunchOverrides, PageSession, PageSessionFactory,
    SessionDirs,
};
