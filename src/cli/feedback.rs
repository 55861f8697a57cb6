//! Post-meeting feedback prompt.

use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use std::io::{self, IsTerminal};
use tracing::info;

use crate::meeting::{Feedback, Rating};

const CHOICES: &[&str] = &[
    "5 - Excellent",
    "4 - Good",
    "3 - Okay",
    "2 - Poor",
    "1 - Unusable",
    "Skip",
];

/// Ask for a 1-5 rating and an optional comment. `None` when skipped or
/// when stdin is not a terminal.
pub fn prompt_feedback(title: &str) -> Result<Option<Feedback>> {
    if !io::stdin().is_terminal() {
        info!("Non-interactive session, skipping feedback prompt");
        return Ok(None);
    }

    let theme = ColorfulTheme::default();
    println!();
    let selection = Select::with_theme(&theme)
        .with_prompt(format!("How was '{title}'?"))
        .items(CHOICES)
        .default(0)
        .interact()?;

    let Some(rating) = rating_for_choice(selection)? else {
        return Ok(None);
    };

    let comment: String = Input::with_theme(&theme)
        .with_prompt("Anything to add? (optional)")
        .allow_empty(true)
        .interact_text()?;

    Ok(Some(Feedback::new(rating, Some(comment))))
}

fn rating_for_choice(selection: usize) -> Result<Option<Rating>> {
    if selection + 1 >= CHOICES.len() {
        return Ok(None);
    }
    let value = u8::try_from(5 - selection)?;
    Ok(Some(Rating::try_from(value)?))
}
