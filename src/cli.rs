// Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "coralux")]
#[command(version)]
#[command(about = "LED aquarium lighting controller simulator", long_about = None)]
pub struct Args {
    /// Latitude in decimal degrees (positive North, negative South)
    #[arg(long)]
    pub lat: Option<f64>,

    /// Longitude in decimal degrees (positive East, negative West)
    #[arg(long)]
    pub lon: Option<f64>,

    /// Timezone as an IANA name (e.g. America/Los_Angeles)
    #[arg(long)]
    pub tz: Option<String>,

    /// UTC offset in hours, overrides --tz
    #[arg(long)]
    pub tz_offset: Option<f64>,

    /// Date in YYYY-MM-DD format for the schedule preview (defaults to today)
    #[arg(long)]
    pub date: Option<String>,

    /// Replace the schedule with a named preset before running
    #[arg(long)]
    pub preset: Option<String>,

    /// Document path (defaults to ~/.coralux.json)
    #[arg(long)]
    pub doc: Option<PathBuf>,

    /// Run the control loop live with simulated drivers
    #[arg(long)]
    pub watch: bool,

    /// Tick interval in seconds for watch mode
    #[arg(long, default_value = "1.0")]
    pub refresh: f64,

    /// Print the persisted document as JSON and exit
    #[arg(long)]
    pub json: bool,
}
