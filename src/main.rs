//! DualSense Link CLI
//!
//! Lists controllers, monitors input and pushes output state (profiles,
//! lightbar, rumble) over USB or Bluetooth.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use dualsense_link::config::Config;
use dualsense_link::output::{Color, OutputFeatures};
use dualsense_link::profile::{Profile, ProfileManager, ProfilePlayerLeds};
use dualsense_link::{
    unknown_devices, ConnectionType, DualSenseError, HidConnector, InputState, OutputState,
    RequestStatus, Session,
};

/// DualSense USB/Bluetooth session tool
#[derive(Parser)]
#[command(name = "dualsense-link")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file or directory
    #[arg(short, long, default_value = "./config", env = "DUALSENSE_LINK_CONFIG")]
    config: PathBuf,

    /// Controller to use, as listed by `list`
    #[arg(short, long, default_value_t = 1)]
    device: usize,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected DualSense controllers
    List {
        /// Only show controllers not in the config's known devices
        #[arg(long)]
        new: bool,

        /// Add the listed controllers to the known devices
        #[arg(long)]
        remember: bool,
    },

    /// Show controller state in real-time
    Monitor {
        /// Output as JSON lines
        #[arg(long)]
        json: bool,

        /// Use non-blocking input requests instead of blocking reads
        #[arg(long = "async")]
        use_async: bool,
    },

    /// Apply a saved profile to the controller
    Apply {
        /// Profile name
        name: String,
    },

    /// Set the lightbar color
    Lightbar { r: u8, g: u8, b: u8 },

    /// Run the rumble motors for a while
    Rumble {
        left: u8,
        right: u8,

        /// How long to rumble, in milliseconds
        #[arg(long, default_value_t = 500)]
        duration_ms: u64,
    },

    /// Manage output profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List available profiles
    List,

    /// Show profile details
    Show {
        /// Profile name
        name: String,
    },

    /// Delete a profile
    Delete {
        /// Profile name
        name: String,
    },

    /// Initialize default profiles
    InitDefaults,

    /// Show profiles directory
    Dir,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("dualsense_link={}", log_level).parse()?),
        )
        .with_target(false)
        .init();

    let config = load_config(&cli.config)?;
    let index = cli.device.saturating_sub(1);

    match cli.command {
        Commands::List { new, remember } => list_controllers(&cli.config, config, new, remember),
        Commands::Monitor { json, use_async } => {
            monitor_controller(&config, index, json, use_async)
        }
        Commands::Apply { name } => apply_profile(&config, index, &name),
        Commands::Lightbar { r, g, b } => set_lightbar(&config, index, Color::new(r, g, b)),
        Commands::Rumble {
            left,
            right,
            duration_ms,
        } => rumble(&config, index, left, right, Duration::from_millis(duration_ms)),
        Commands::Profile { action } => handle_profile_command(action),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!("No configuration at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    Config::load_dir(path)
}

fn config_file(path: &Path) -> PathBuf {
    if path.is_dir() || path.extension().is_none() {
        path.join("config.json")
    } else {
        path.to_path_buf()
    }
}

fn open_session(config: &Config, index: usize) -> Result<Session<HidConnector>> {
    let connector = HidConnector::new().context("Failed to initialize HID API")?;
    let devices = connector.enumerate()?;
    let count = devices.len();
    let Some(descriptor) = devices.into_iter().nth(index) else {
        if count == 0 {
            bail!("No DualSense controller found");
        }
        bail!("Controller {} not found ({} connected)", index + 1, count);
    };

    Session::open(connector, descriptor, config.session.clone())
        .context("Failed to open DualSense session")
}

fn list_controllers(
    config_path: &Path,
    mut config: Config,
    new: bool,
    remember: bool,
) -> Result<()> {
    println!("{}", "Searching for DualSense controllers...".dimmed());

    let connector = HidConnector::new().context("Failed to initialize HID API")?;
    let devices = connector.enumerate()?;
    let shown: Vec<_> = if new {
        unknown_devices(&devices, &config.known_devices)
    } else {
        devices.iter().collect()
    };

    if shown.is_empty() {
        if new && !devices.is_empty() {
            println!("{} No new controllers", "✓".bright_green());
            return Ok(());
        }
        println!("{} No DualSense controllers found", "✗".bright_red());
        println!();
        println!("Make sure your controller is:");
        println!("  • Connected via USB cable, or");
        println!(
            "  • Paired via Bluetooth (hold {} + {} to pair)",
            "Create".bright_cyan(),
            "PS".bright_cyan()
        );
        return Ok(());
    }

    println!(
        "\n{} Found {} controller(s):\n",
        "✓".bright_green(),
        shown.len()
    );

    for (i, device) in shown.iter().enumerate() {
        let connection = match device.connection() {
            ConnectionType::Bluetooth => "Bluetooth".bright_magenta(),
            ConnectionType::Usb => "USB".bright_cyan(),
        };
        println!(
            "  {}. {:08x} ({}) {}",
            i + 1,
            device.id(),
            connection,
            device.path().dimmed()
        );
    }
    println!();

    if remember {
        let ids: Vec<u32> = shown.iter().map(|d| d.id()).collect();
        let added = ids.into_iter().filter(|&id| config.remember_device(id)).count();
        if added > 0 {
            let file = config_file(config_path);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            config.save(&file)?;
            println!(
                "{} Remembered {} controller(s) in {}",
                "✓".bright_green(),
                added,
                file.display()
            );
        }
    }

    Ok(())
}

/// Flat per-report record for `monitor --json`
#[derive(Debug, Serialize)]
struct MonitorSample {
    timestamp: u32,
    delta_us: f64,

    buttons: Vec<&'static str>,

    // Normalized -1.0 to 1.0 for sticks, 0.0 to 1.0 for triggers
    left_stick_x: f32,
    left_stick_y: f32,
    right_stick_x: f32,
    right_stick_y: f32,
    l2_trigger: f32,
    r2_trigger: f32,

    // rad/s
    gyro_x: f32,
    gyro_y: f32,
    gyro_z: f32,

    // g
    accel_x: f32,
    accel_y: f32,
    accel_z: f32,

    battery_percent: u8,
    battery_charging: bool,
    headphones: bool,

    touch1_active: bool,
    touch1_x: u16,
    touch1_y: u16,
    touch2_active: bool,
    touch2_x: u16,
    touch2_y: u16,
}

impl From<&InputState> for MonitorSample {
    fn from(state: &InputState) -> Self {
        let (lx, ly) = state.left_stick.normalized();
        let (rx, ry) = state.right_stick.normalized();
        let gyro = state.gyroscope.to_rad_per_sec();
        let accel = state.accelerometer.to_g();
        let [t1, t2] = state.touch_points;

        Self {
            timestamp: state.current_time,
            // Device clock ticks are 1/3 us
            delta_us: f64::from(state.delta_time) / 3.0,
            buttons: state.pressed_names(),
            left_stick_x: lx,
            left_stick_y: ly,
            right_stick_x: rx,
            right_stick_y: ry,
            l2_trigger: f32::from(state.left_trigger) / 255.0,
            r2_trigger: f32::from(state.right_trigger) / 255.0,
            gyro_x: gyro.x,
            gyro_y: gyro.y,
            gyro_z: gyro.z,
            accel_x: accel.x,
            accel_y: accel.y,
            accel_z: accel.z,
            battery_percent: state.battery.percentage(),
            battery_charging: state.battery.charging,
            headphones: state.headphone_connected,
            touch1_active: t1.down,
            touch1_x: t1.x,
            touch1_y: t1.y,
            touch2_active: t2.down,
            touch2_x: t2.x,
            touch2_y: t2.y,
        }
    }
}

fn read_next(
    session: &mut Session<HidConnector>,
    use_async: bool,
) -> Result<InputState, DualSenseError> {
    if !use_async {
        return session.read_input_blocking();
    }
    if session.has_pending_request() {
        return session.await_input_request();
    }
    match session.start_input_request()? {
        RequestStatus::Complete => session.held_input_state(),
        RequestStatus::Pending => session.await_input_request(),
    }
}

fn monitor_controller(config: &Config, index: usize, json: bool, use_async: bool) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    println!(
        "{} Searching for DualSense controller...",
        "→".bright_blue()
    );

    let mut session = open_session(config, index)?;

    println!(
        "{} Connected via {}! Monitoring inputs...",
        "✓".bright_green(),
        session.connection()
    );
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    if let Some(name) = &config.default_profile {
        match ProfileManager::new().and_then(|m| m.get(name)) {
            Ok(profile) => session.write_output_blocking(&profile.to_output_state())?,
            Err(e) => warn!("Default profile not applied: {:#}", e),
        }
    }

    let min_interval = match config.monitor_rate_hz {
        0 => Duration::ZERO,
        hz => Duration::from_secs(1) / hz,
    };
    let mut last_print: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        if !session.is_connected() {
            match session.reconnect() {
                Ok(()) => println!("{} Reconnected", "✓".bright_green()),
                Err(e) => {
                    debug!("Reconnect failed: {}", e);
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
            continue;
        }

        match read_next(&mut session, use_async) {
            Ok(state) => {
                if last_print.is_some_and(|t| t.elapsed() < min_interval) {
                    continue;
                }
                last_print = Some(Instant::now());
                if json {
                    print_state_json(&state);
                } else {
                    print_state_pretty(&state);
                }
            }
            Err(DualSenseError::IoTimeout) => {}
            Err(DualSenseError::DeviceRemoved) => {
                println!("{} Controller disconnected, waiting...", "!".bright_yellow());
            }
            Err(e) if e.is_transient() => debug!("Skipped report: {}", e),
            Err(e) => {
                error!("Controller error: {}", e);
                break;
            }
        }
    }

    session.close();
    println!("\n{} Monitoring stopped", "✓".bright_green());
    Ok(())
}

fn print_state_json(state: &InputState) {
    let sample = MonitorSample::from(state);
    if let Ok(json) = serde_json::to_string(&sample) {
        println!("{}", json);
    }
}

fn print_state_pretty(state: &InputState) {
    print!("\x1B[2J\x1B[1;1H"); // Clear screen

    let (lx, ly) = state.left_stick.normalized();
    let (rx, ry) = state.right_stick.normalized();
    let gyro = state.gyroscope.to_rad_per_sec();
    let accel = state.accelerometer.to_g();

    println!("{}", "DualSense Controller State".bright_white().bold());
    println!("{}", "══════════════════════════════════════".dimmed());

    println!("\n{}", "Analog Sticks".bright_cyan());
    println!("  Left:  X {}  Y {}", format_value(lx), format_value(ly));
    println!("  Right: X {}  Y {}", format_value(rx), format_value(ry));

    println!("\n{}", "Triggers".bright_cyan());
    println!(
        "  L2: {}  R2: {}",
        format_bar(f32::from(state.left_trigger) / 255.0),
        format_bar(f32::from(state.right_trigger) / 255.0)
    );
    println!(
        "  Feedback: L {:#04x}  R {:#04x}",
        state.left_trigger_feedback, state.right_trigger_feedback
    );

    println!("\n{}", "Buttons".bright_cyan());
    let pressed = state.pressed_names();
    if pressed.is_empty() {
        println!("  {}", "none".dimmed());
    } else {
        println!("  {}", pressed.join(" ").bright_green());
    }

    println!("\n{}", "Motion".bright_cyan());
    println!(
        "  Gyro:  {:+.2} {:+.2} {:+.2} rad/s",
        gyro.x, gyro.y, gyro.z
    );
    println!(
        "  Accel: {:+.2} {:+.2} {:+.2} g",
        accel.x, accel.y, accel.z
    );

    println!("\n{}", "Battery".bright_cyan());
    let status = if state.battery.fully_charged {
        "full"
    } else if state.battery.charging {
        "charging"
    } else {
        "discharging"
    };
    println!("  {}% ({})", state.battery.percentage(), status);
    if state.headphone_connected {
        println!("  Headphones connected");
    }

    for (i, touch) in state.touch_points.iter().enumerate() {
        if touch.down {
            println!("  Touch {}: ({}, {}) id {}", i + 1, touch.x, touch.y, touch.id);
        }
    }

    println!(
        "\n{}",
        format!("t={} (+{:.0} us)", state.current_time, f64::from(state.delta_time) / 3.0).dimmed()
    );
    println!("{}", "Press Ctrl+C to stop".dimmed());
}

fn format_value(v: f32) -> String {
    if v > 0.1 {
        format!("{:+.2}", v).bright_green().to_string()
    } else if v < -0.1 {
        format!("{:+.2}", v).bright_red().to_string()
    } else {
        format!("{:+.2}", v).dimmed().to_string()
    }
}

fn format_bar(v: f32) -> String {
    let filled = (v * 10.0) as usize;
    let bar: String = (0..10)
        .map(|i| if i < filled { '█' } else { '░' })
        .collect();
    if v > 0.5 {
        bar.bright_green().to_string()
    } else if v > 0.1 {
        bar.bright_yellow().to_string()
    } else {
        bar.dimmed().to_string()
    }
}

fn apply_profile(config: &Config, index: usize, name: &str) -> Result<()> {
    let manager = ProfileManager::new()?;
    let profile = manager.get(name)?;

    println!(
        "{} Applying profile: {}",
        "→".bright_blue(),
        profile.name.bright_cyan()
    );

    let mut session = open_session(config, index)?;
    session.write_output_blocking(&profile.to_output_state())?;
    session.close();

    println!("{} Profile applied successfully", "✓".bright_green());
    println!(
        "  LED: #{:02X}{:02X}{:02X}",
        profile.led_color.r, profile.led_color.g, profile.led_color.b
    );
    println!("  L2:  {:?}", profile.l2_trigger);
    println!("  R2:  {:?}", profile.r2_trigger);
    Ok(())
}

fn set_lightbar(config: &Config, index: usize, color: Color) -> Result<()> {
    let mut session = open_session(config, index)?;
    let state = OutputState {
        lightbar: color,
        ..Default::default()
    };
    let features = OutputFeatures {
        lightbar: true,
        ..OutputFeatures::none()
    };
    session.write_output_with(&state, features)?;
    session.close();
    info!("Lightbar set to #{:02X}{:02X}{:02X}", color.r, color.g, color.b);
    Ok(())
}

fn rumble(config: &Config, index: usize, left: u8, right: u8, duration: Duration) -> Result<()> {
    let mut session = open_session(config, index)?;
    let features = OutputFeatures {
        rumble: true,
        ..OutputFeatures::none()
    };
    let state = OutputState {
        left_rumble: left,
        right_rumble: right,
        rumble_strength: 0xFF,
        ..Default::default()
    };
    session.write_output_with(&state, features)?;
    std::thread::sleep(duration);
    session.write_output_with(&OutputState::default(), features)?;
    session.close();
    Ok(())
}

fn handle_profile_command(action: ProfileCommands) -> Result<()> {
    let manager = ProfileManager::new()?;

    match action {
        ProfileCommands::List => {
            let profiles = manager.list()?;

            if profiles.is_empty() {
                println!("{} No profiles found", "!".bright_yellow());
                println!(
                    "\nCreate default profiles with: {} profile init-defaults",
                    "dualsense-link".bright_cyan()
                );
            } else {
                println!("{}", "Available Profiles".bright_white().bold());
                println!("{}", "══════════════════════════════════════".dimmed());
                for profile in profiles {
                    let lightbar = match profile.lightbar {
                        Some(c) => format!("#{:02X}{:02X}{:02X}", c.r, c.g, c.b),
                        None => "off".to_string(),
                    };
                    println!(
                        "  {} ({}) - {}",
                        profile.name.bright_cyan(),
                        profile.id,
                        profile.description.dimmed()
                    );
                    println!(
                        "      lightbar {}  L2 {}  R2 {}",
                        lightbar,
                        profile.l2_trigger.name().bright_yellow(),
                        profile.r2_trigger.name().bright_yellow()
                    );
                }
            }
        }

        ProfileCommands::Show { name } => {
            let profile = manager.get(&name)?;
            print_profile(&profile);
        }

        ProfileCommands::Delete { name } => {
            if !manager.delete(&name)? {
                bail!("Profile '{}' not found", name);
            }
            println!("{} Deleted profile {}", "✓".bright_green(), name.bright_cyan());
        }

        ProfileCommands::InitDefaults => {
            let created = manager.init_defaults()?;
            if created == 0 {
                println!("{} Profiles already exist, nothing to do", "!".bright_yellow());
            } else {
                println!(
                    "{} Created {} default profiles in {}",
                    "✓".bright_green(),
                    created,
                    manager.profiles_dir().display()
                );
            }
        }

        ProfileCommands::Dir => {
            println!("{}", manager.profiles_dir().display());
        }
    }

    Ok(())
}

fn print_profile(profile: &Profile) {
    println!("{}", "Profile Details".bright_white().bold());
    println!("{}", "══════════════════════════════════════".dimmed());
    println!("  Name:        {}", profile.name.bright_cyan());
    println!("  Description: {}", profile.description);
    println!(
        "  LED Color:   #{:02X}{:02X}{:02X}{}",
        profile.led_color.r,
        profile.led_color.g,
        profile.led_color.b,
        if profile.lightbar_enabled { "" } else { " (off)" }
    );
    println!("  L2 Trigger:  {}", format!("{:?}", profile.l2_trigger).bright_yellow());
    println!("  R2 Trigger:  {}", format!("{:?}", profile.r2_trigger).bright_yellow());
    println!("  Mute LED:    {:?}", profile.mute_led);
    println!("  Rumble:      {:#04x}", profile.rumble_strength);
    if let Some(leds) = &profile.player_leds {
        match leds {
            ProfilePlayerLeds::Number(n) => println!("  Player LEDs: Player {}", n),
            ProfilePlayerLeds::Custom(custom) => {
                let pattern: String = (0..5)
                    .map(|bit| if custom.bitmask & (1 << bit) != 0 { "●" } else { "○" })
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("  Player LEDs: {}", pattern);
            }
        }
    }
}
