//! FragmentSync TUI: admin dashboard for the section content pipeline.

mod app;
mod screens;
mod widgets;

use color_eyre::eyre::Result;

fn main() -> Result<()> {
    color_eyre::install()?;
    app::run()
}
