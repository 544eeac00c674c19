pub mod browser;
pub mod picker;

pub use browser::{draw_browser, list_height, render_lines};
pub use picker::{PickerFlow, ServerPicker, draw_picker};
