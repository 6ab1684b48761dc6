//! CLI argument parsing for the dispatch-engine binary.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dispatch-engine", about = "Crew dispatch scheduling and route optimization")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Merge a booking feed and run the full-day optimization pass
    Optimize {
        /// Schedule date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
        /// JSON array of external bookings to merge first
        #[arg(long)]
        feed: Option<PathBuf>,
        /// JSON manager/crew roster; an empty roster falls back to the built-in one
        #[arg(long)]
        roster: Option<PathBuf>,
    },
    /// Print capacity and duplicate warnings for a day
    Conflicts {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Finalize a day and print the technician records as JSON
    Finalize {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Print the per-technician notification payload as JSON
    Notify {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Summarize stored schedules for consecutive days
    Week {
        /// First day of the range
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_optimize_with_feed() {
        let cli = Cli::parse_from(["dispatch-engine", "optimize", "--date", "2026-03-02", "--feed", "bookings.json"]);
        match cli.command {
            Command::Optimize { date, feed, roster } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
                assert_eq!(feed, Some(PathBuf::from("bookings.json")));
                assert!(roster.is_none());
            }
            _ => panic!("expected optimize"),
        }
    }

    #[test]
    fn test_cli_optimize_with_roster() {
        let cli = Cli::parse_from(["dispatch-engine", "optimize", "--date", "2026-03-02", "--roster", "roster.json"]);
        assert!(matches!(
            cli.command,
            Command::Optimize { feed: None, roster: Some(ref path), .. } if path == &PathBuf::from("roster.json")
        ));
    }

    #[test]
    fn test_cli_week_defaults_to_seven_days() {
        let cli = Cli::parse_from(["dispatch-engine", "week", "--date", "2026-03-02"]);
        assert!(matches!(cli.command, Command::Week { days: 7, .. }));
    }

    #[test]
    fn test_cli_rejects_bad_date() {
        let result = Cli::try_parse_from(["dispatch-engine", "conflicts", "--date", "03/02/2026"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["dispatch-engine"]).is_err());
    }
}
