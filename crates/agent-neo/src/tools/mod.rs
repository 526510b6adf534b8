//! A set of built-in tools that models can use.

mod time;
mod weather;

pub use time::CurrentTimeTool;
pub use weather::{WeatherTool, WeatherToolBuilder};
