use std::env;

use fugit::SecsDurationU32;
use inquire::Select;
use scpi_session::{
    DriverConfig, PowerSupply, Session,
    calibration::{Calibrations, Polynomial},
    device::Quantity,
    serial::SerialTransport,
};
use tracing_subscriber::EnvFilter;

// Configuration constants - adjust these for your setup
const OUTPUT_VOLTAGE: f64 = 5.0;
const CURRENT_LIMIT: f64 = 0.1;
const CURRENT_PROTECTION: f64 = 0.5;
const STABILIZATION_DELAY_MS: u64 = 1000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Optional TOML config as the second argument
    let mut config = match env::args().nth(2) {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };

    // Serial port from the command line, the config, or interactive selection
    if let Some(port) = env::args().nth(1) {
        config.serial.port = port;
    }
    if config.serial.port.is_empty() {
        let ports = serialport::available_ports()?;
        if ports.is_empty() {
            return Err("No serial ports found!".into());
        }
        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();
        config.serial.port = Select::new("Select a serial port:", port_names).prompt()?;
    }

    println!("Using port: {}", config.serial.port);

    let session: Session<SerialTransport> = Session::open(&config.serial, config.session.clone())?;
    let calibrations =
        Calibrations::default().with(Quantity::Voltage, Polynomial::new([1.0, 0.0])?);
    let mut psu = PowerSupply::new(session, config.device_profile()).with_calibrations(calibrations);

    println!("Identity: {}", psu.identify()?);
    println!("Status: {}", psu.status()?);

    psu.apply(OUTPUT_VOLTAGE, CURRENT_LIMIT)?;
    let (volts, amps) = psu.get_applied()?;
    println!("Applied {volts} V, {amps} A");

    psu.set_current_protection_level(CURRENT_PROTECTION)?;
    psu.set_current_protection_state(true)?;
    psu.set_delay(SecsDurationU32::secs(1))?;
    println!("Output delay: {} s", psu.get_delay()?.to_secs());

    psu.set_output(true)?;
    println!("Output enabled");

    // Wait for output to stabilize
    std::thread::sleep(std::time::Duration::from_millis(STABILIZATION_DELAY_MS));

    println!("Measured voltage: {:.3} V", psu.read_voltage()?);
    println!("Measured current: {:.3} A", psu.read_current()?);
    println!("Measured power: {:.3} W", psu.read_power()?);

    if psu.is_current_protection_tripped()? {
        println!("Over-current protection tripped, clearing");
        let still_tripped = psu.clear_current_protection()?;
        println!("Still tripped: {still_tripped}");
    }

    psu.set_output(false)?;
    println!("Output disabled");

    let mut session = psu.into_inner();
    println!("Event status: {:?}", session.event_status()?);
    session.close();
    Ok(())
}
