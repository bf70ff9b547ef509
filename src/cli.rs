use fsnotifier::EventType;
use std::path::PathBuf;

#[derive(clap::Parser)]
pub struct Cli {
    /// Paths to watch.
    #[clap(required = true)]
    pub paths: Vec<PathBuf>,
    /// Only report these event types, e.g. `create` or `moved_from`. Repeatable.
    #[clap(long = "only", value_parser = parse_event_type)]
    pub only: Vec<EventType>,
    /// Remove each watch after its first event.
    #[clap(long)]
    pub oneshot: bool,
    #[clap(long)]
    pub no_follow: bool,
    /// Only watch paths that are directories.
    #[clap(long)]
    pub dir_only: bool,
    /// Dispatch each event to the first capable handler only.
    #[clap(long)]
    pub handle_once: bool,
    /// Don't warn about events no handler took.
    #[clap(long)]
    pub quiet_unhandled: bool,
}

/// Accepts flag names in any case, joined with `|`.
fn parse_event_type(value: &str) -> Result<EventType, String> {
    bitflags::parser::from_str::<EventType>(&value.to_uppercase()).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_event_type() {
        assert_eq!(parse_event_type("create"), Ok(EventType::CREATE));
        assert_eq!(
            parse_event_type("Moved_From | delete"),
            Ok(EventType::MOVED_FROM | EventType::DELETE)
        );
        assert_eq!(parse_event_type("close"), Ok(EventType::CLOSE));
        assert!(parse_event_type("renamed").is_err());
    }

    #[test]
    fn test_repeated_only() {
        let cli = Cli::parse_from(["fsnotifier", "--only", "create", "--only", "moved", "/tmp"]);
        assert_eq!(cli.only, vec![EventType::CREATE, EventType::MOVED]);
        assert_eq!(cli.paths, vec![PathBuf::from("/tmp")]);
        assert!(!cli.oneshot);
    }
}
