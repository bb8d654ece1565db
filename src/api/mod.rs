pub mod dto;
pub mod server;

use crate::ports::dot_exporter::DotExporter;
use crate::ports::text_exporter::TextExporter;
use crate::ports::DiagramExporter;
use dto::JsonExporter;

/// Output formats accepted by the CLI and the IPC server.
pub const FORMATS: &[&str] = &["dot", "json", "text"];

/// Look up the exporter for a format name.
pub fn exporter_for(format: &str, show_none_returns: bool) -> Option<Box<dyn DiagramExporter>> {
    match format {
        "dot" => Some(Box::new(DotExporter::new(show_none_returns))),
        "json" => Some(Box::new(JsonExporter)),
        "text" => Some(Box::new(TextExporter)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_for() {
        for format in FORMATS {
            assert_eq!(exporter_for(format, false).unwrap().format_name(), *format);
        }
        assert!(exporter_for("svg", false).is_none());
    }
}
