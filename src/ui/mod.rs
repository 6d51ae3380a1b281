pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    error, file_failed, header, info, muted, progress, section, status, success, summary_row,
    sync_report, timing, warn,
};
pub use table::{files_table, repos_table, TableBuilder};
pub use theme::{theme, Theme};
