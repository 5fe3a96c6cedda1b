// Coralux CLI simulator
// Drives the control core against simulated hardware: prints today's
// astronomical table and a schedule preview, or runs the live loop

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use clap::Parser;

use coralux::astro::moon::moon_intensity;
use coralux::astro::sun::sun_intensity;
use coralux::astro::{format_minutes, AstroEngine, AstronomicalTimes, Location, ProjectionConfig};
use coralux::cli::Args;
use coralux::controller::{ControllerIo, LightController};
use coralux::document::PersistedDocument;
use coralux::hal::{
    FilePersistence, NullEventSink, RecordingCurrentDriver, RecordingFanDriver,
    RecordingPwmDriver, SensorReading, SystemClock, TemperatureProbe, WallClock,
};
use coralux::schedule::Schedule;

/// Probe that always reads fresh, for the simulator.
struct SimProbe {
    name: String,
    celsius: f64,
    started: Instant,
}

impl SimProbe {
    fn new(name: &str, celsius: f64) -> Self {
        Self {
            name: name.to_string(),
            celsius,
            started: Instant::now(),
        }
    }
}

impl TemperatureProbe for SimProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> SensorReading {
        SensorReading {
            valid: true,
            celsius: self.celsius,
            last_update_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let doc_path = match &args.doc {
        Some(path) => path.clone(),
        None => FilePersistence::default_path()?,
    };
    let mut persistence = FilePersistence::new(doc_path, FilePersistence::DEFAULT_CAPACITY);

    let mut controller = LightController::new(PersistedDocument::default());
    controller.boot(&mut persistence);

    apply_overrides(&mut controller, &args)?;

    if args.json {
        println!("{}", controller.export_json()?);
        return Ok(());
    }

    let date = match &args.date {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .with_context(|| format!("invalid date {text:?}"))?,
        None => Local::now().date_naive(),
    };

    print_preview(controller.document(), date);

    if args.watch {
        run_watch(controller, persistence, args.refresh)?;
    }
    Ok(())
}

fn apply_overrides(controller: &mut LightController, args: &Args) -> Result<()> {
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        controller.set_location(lat, lon)?;
    }

    if let Some(offset) = args.tz_offset {
        let name = args.tz.clone().unwrap_or_else(|| "UTC".to_string());
        controller.set_timezone(&name, offset);
    } else if let Some(name) = &args.tz {
        let tz: Tz = name
            .parse()
            .map_err(|e| anyhow!("unknown timezone {name:?}: {e}"))?;
        let offset_seconds = tz
            .from_utc_datetime(&Utc::now().naive_utc())
            .offset()
            .fix()
            .local_minus_utc();
        controller.set_timezone(name, f64::from(offset_seconds) / 3600.0);
    }

    if let Some(preset) = &args.preset {
        controller
            .apply_preset(preset)
            .map_err(|e| anyhow!("preset failed: {e}"))?;
    }
    Ok(())
}

fn print_preview(doc: &PersistedDocument, date: NaiveDate) {
    let mut engine = AstroEngine::new(
        Location::clamped(doc.latitude, doc.longitude),
        doc.timezone_offset_hours,
    );
    engine.set_projection(ProjectionConfig {
        enabled: doc.astronomical_projection,
        shift_hours: doc.time_shift_hours,
        shift_minutes: doc.time_shift_minutes,
    });
    let times = engine.times_for_date(date);

    println!(
        "Location {:.4}, {:.4}  UTC{:+.1}  {}",
        doc.latitude, doc.longitude, doc.timezone_offset_hours, date
    );
    print_astro_table(&times);

    if let Some(noon) = date.and_hms_opt(12, 0, 0) {
        let sun = engine.solar_position_at(&noon);
        let moon = engine.lunar_position_at(&noon);
        println!(
            "  Sun at 12:00   alt {:6.1}  az {:6.1}  intensity {:.2}",
            sun.altitude,
            sun.azimuth,
            sun_intensity(sun.altitude)
        );
        println!(
            "  Moon at 12:00  alt {:6.1}  az {:6.1}  intensity {:.2}",
            moon.altitude,
            moon.azimuth,
            moon_intensity(moon.altitude, times.moon_phase)
        );
    }

    if doc.schedule.is_empty() {
        println!("\nSchedule: (empty)");
        return;
    }

    println!("\nSchedule preview ({} channels):", doc.num_channels);
    let resolved = doc.schedule.resolve(&times);
    for step in 0..24 {
        let minute = (step * 60) as u16;
        let out = Schedule::interpolate(&resolved, minute, doc.num_channels);
        let pwm: Vec<String> = out.pwm.iter().map(|p| format!("{p:5.1}")).collect();
        println!("  {}  [{}]", format_minutes(minute), pwm.join(" "));
    }
}

fn print_astro_table(times: &AstronomicalTimes) {
    if !times.valid {
        println!("  (sun does not rise and set today; using fallback times)");
    }
    println!("  Sunrise      {}", format_minutes(times.sunrise));
    println!("  Sunset       {}", format_minutes(times.sunset));
    println!("  Solar noon   {}", format_minutes(times.solar_noon));
    println!("  Civil dawn   {}", format_minutes(times.civil_dawn));
    println!("  Civil dusk   {}", format_minutes(times.civil_dusk));
    if times.moon_valid {
        println!("  Moonrise     {}", format_minutes(times.moonrise));
        println!("  Moonset      {}", format_minutes(times.moonset));
    } else {
        println!("  Moonrise     --:--");
        println!("  Moonset      --:--");
    }
    println!("  Moon phase   {:.2}", times.moon_phase);
}

fn run_watch(
    mut controller: LightController,
    mut persistence: FilePersistence,
    refresh_seconds: f64,
) -> Result<()> {
    let mut clock = SystemClock::new();
    let num_channels = controller.document().num_channels;
    let mut pwm = RecordingPwmDriver::new(num_channels);
    let mut current = RecordingCurrentDriver::new(num_channels);
    let mut fan = RecordingFanDriver::default();
    let mut probes: Vec<Box<dyn TemperatureProbe>> =
        vec![Box::new(SimProbe::new("heatsink", 42.0))];
    let mut events = NullEventSink;

    {
        let mut io = ControllerIo {
            clock: &mut clock,
            pwm: &mut pwm,
            current: &mut current,
            fan: &mut fan,
            probes: &mut probes,
            persistence: &mut persistence,
            events: &mut events,
        };
        controller.complete_boot(&mut io);
    }

    let interval = Duration::from_secs_f64(refresh_seconds.max(0.1));
    println!("\nRunning (Ctrl-C to stop)...");
    loop {
        {
            let mut io = ControllerIo {
                clock: &mut clock,
                pwm: &mut pwm,
                current: &mut current,
                fan: &mut fan,
                probes: &mut probes,
                persistence: &mut persistence,
                events: &mut events,
            };
            controller.tick(&mut io);
        }

        let reading = clock.now();
        let outputs = controller.channel_outputs();
        let pwm_text: Vec<String> = outputs
            .iter()
            .map(|o| format!("{:5.1}", o.pwm_percent))
            .collect();
        let status = controller.temperature_status(&mut fan);
        println!(
            "{:02}:{:02}:{:02}  pwm [{}]  heatsink {:4.1}C  fan {:5.1}%{}",
            reading.hour,
            reading.minute,
            reading.second,
            pwm_text.join(" "),
            status.current_c,
            status.fan_pwm_percent,
            if controller.in_thermal_emergency() {
                "  THERMAL EMERGENCY"
            } else {
                ""
            }
        );

        thread::sleep(interval);
    }
}
