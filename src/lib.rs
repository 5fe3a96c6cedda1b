// Coralux library - control core for a multi-channel LED aquarium lighting
// controller. Binaries (the CLI simulator) share these modules.

pub mod astro;
pub mod cli;
pub mod controller;
pub mod document;
pub mod hal;
pub mod moonlight;
pub mod pid;
pub mod schedule;
pub mod temp;
