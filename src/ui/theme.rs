use ratatui::style::Color;

// Roles, not raw colors. Add a role here rather than picking a color at a call site.
pub const BAR_BG: Color = Color::Rgb(14, 18, 24);
pub const FG: Color = Color::Rgb(229, 231, 235);
pub const MUTED: Color = Color::Rgb(156, 163, 175);
pub const DIM: Color = Color::Rgb(107, 114, 128);
pub const BORDER: Color = Color::Rgb(55, 65, 81);

pub const ACCENT: Color = Color::Rgb(255, 159, 26);
pub const MATCH_BG: Color = Color::Rgb(44, 32, 16);

pub const WARN: Color = Color::Rgb(250, 204, 21);
pub const ERROR: Color = Color::Rgb(248, 113, 113);

pub const USER: Color = Color::Cyan;
pub const ASSISTANT: Color = Color::Rgb(134, 239, 172);
pub const THINKING: Color = Color::Magenta;
pub const TOOL: Color = Color::LightBlue;
