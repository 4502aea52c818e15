use clap::Subcommand;
use deepfocus_core::{interrupted_xp, project_xp, session_xp, SessionDuration, WillpowerLevel};
use serde_json::json;

use super::{print_json, CliResult};

#[derive(Subcommand)]
pub enum XpAction {
    /// XP for completing a session
    Session {
        /// Duration in minutes: 60, 90 or 120
        #[arg(long)]
        duration: u32,
        /// Willpower level: high, medium or low
        #[arg(long)]
        willpower: WillpowerLevel,
    },
    /// XP for finishing a project
    Project {
        /// Cost, 1-10
        #[arg(long)]
        cost: u32,
        /// Benefit, 1-10
        #[arg(long)]
        benefit: u32,
        /// The final boss battle doubles the reward
        #[arg(long)]
        boss: bool,
    },
    /// XP for an interrupted session
    Interrupted,
    /// Every duration/willpower combination
    Table,
}

pub fn run(action: XpAction) -> CliResult {
    match action {
        XpAction::Session {
            duration,
            willpower,
        } => {
            let duration = SessionDuration::try_from(duration)?;
            print_json(&json!({
                "duration_minutes": duration.minutes(),
                "difficulty": duration.difficulty_label(),
                "willpower": willpower,
                "xp": session_xp(duration, willpower),
            }))?;
        }
        XpAction::Project {
            cost,
            benefit,
            boss,
        } => {
            let xp = project_xp(cost, benefit, boss)?;
            print_json(&json!({ "cost": cost, "benefit": benefit, "boss_battle": boss, "xp": xp }))?;
        }
        XpAction::Interrupted => {
            print_json(&json!({ "xp": interrupted_xp() }))?;
        }
        XpAction::Table => {
            let rows: Vec<_> = SessionDuration::ALL
                .iter()
                .flat_map(|&duration| {
                    WillpowerLevel::ALL.iter().map(move |&willpower| {
                        json!({
                            "duration_minutes": duration.minutes(),
                            "willpower": willpower,
                            "xp": session_xp(duration, willpower),
                        })
                    })
                })
                .collect();
            print_json(&rows)?;
        }
    }
    Ok(())
}
