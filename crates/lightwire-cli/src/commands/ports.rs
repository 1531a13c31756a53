//! Ports command: lists serial ports the sensor could be on.

use std::io::{self, Write};

use lightwire_host::{PortSummary, available_ports};

use crate::error::{CliError, CliResult};

/// Prints every serial port found on the system.
pub fn list(json: bool) -> CliResult<()> {
    let ports = available_ports()?;
    let stdout = io::stdout();
    write_ports(&mut stdout.lock(), &ports, json)
}

/// Writes a port list as text, or as one JSON object per line.
pub fn write_ports<W: Write>(out: &mut W, ports: &[PortSummary], json: bool) -> CliResult<()> {
    if json {
        for port in ports {
            let line = serde_json::to_string(port)
                .map_err(|e| CliError::Io(io::Error::other(e)))?;
            writeln!(out, "{}", line)?;
        }
        return Ok(());
    }

    if ports.is_empty() {
        writeln!(out, "No serial ports found.")?;
        return Ok(());
    }

    for port in ports {
        match port.product {
            Some(ref product) => writeln!(out, "{}\t{}\t{}", port.name, port.kind, product)?,
            None => writeln!(out, "{}\t{}", port.name, port.kind)?,
        }
    }
    Ok(())
}
