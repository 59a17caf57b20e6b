//! Serial line sampler.
//!
//! Drains newline-terminated lines from the serial port and keeps one line
//! out of every `sample_period`, appending it to the CSV log with a
//! timestamp. The loop is blocking; run it on a blocking thread and stop it
//! through the cancellation token.

use std::{io::Read, thread, time::Duration};

use chrono::Local;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    csv_log::{CsvLog, LogEntry},
    error::SerialError,
};
use crate::config::serial::SerialConfig;

/// A stream of raw lines. Implemented by the serial port and by test fakes.
pub trait LineSource {
    /// Bytes waiting in the input buffer.
    fn bytes_to_read(&mut self) -> Result<u32, SerialError>;

    /// Reads up to and including the next `\n`. Returns what arrived before
    /// the read timeout if the terminator never came.
    fn read_line(&mut self) -> Result<Vec<u8>, SerialError>;
}

pub struct SerialPortSource {
    port: Box<dyn SerialPort>,
}

impl SerialPortSource {
    /// Opens the port 8N1 without flow control.
    pub fn open(config: &SerialConfig) -> Result<Self, SerialError> {
        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout())
            .open()
            .map_err(|source| SerialError::Open {
                path: config.port_path.clone(),
                source,
            })?;

        info!(
            "Opened serial port {} at {} baud",
            config.port_path, config.baud_rate
        );
        Ok(Self { port })
    }
}

impl LineSource for SerialPortSource {
    fn bytes_to_read(&mut self) -> Result<u32, SerialError> {
        Ok(self.port.bytes_to_read()?)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, SerialError> {
        let mut buffer = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    buffer.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Ok(_) => break,
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(SerialError::Read(e)),
            }
        }

        Ok(buffer)
    }
}

/// Countdown that fires once every `period` ticks, starting with the
/// `period`-th.
#[derive(Debug, Clone)]
pub struct Decimator {
    period: u32,
    counter: u32,
}

impl Decimator {
    pub fn new(period: u32) -> Self {
        let period = period.max(1);
        Self {
            period,
            counter: period,
        }
    }

    /// True when this tick's line should be kept.
    pub fn tick(&mut self) -> bool {
        if self.counter <= 1 {
            self.counter = self.period;
            true
        } else {
            self.counter -= 1;
            false
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggerStats {
    pub persisted: u64,
    pub discarded: u64,
    pub decode_errors: u64,
    pub read_errors: u64,
    pub write_errors: u64,
}

pub struct SerialLogger<S: LineSource> {
    source: S,
    log: CsvLog,
    decimator: Decimator,
    warmup_reads: u32,
    idle_wait: Duration,
    stats: LoggerStats,
}

impl<S: LineSource> SerialLogger<S> {
    pub fn new(source: S, config: &SerialConfig) -> Self {
        Self {
            source,
            log: CsvLog::new(config.output_path()),
            decimator: Decimator::new(config.sample_period),
            warmup_reads: config.warmup_reads,
            idle_wait: config.idle_wait(),
            stats: LoggerStats::default(),
        }
    }

    /// Throws away whatever the device buffered before we started.
    fn warm_up(&mut self) {
        for n in 1..=self.warmup_reads {
            match self.source.read_line() {
                Ok(line) => trace!("Warm-up read {} discarded {} bytes", n, line.len()),
                Err(e) => warn!("Warm-up read {} failed: {}", n, e),
            }
        }
    }

    /// Runs until `cancel` fires, then releases the source and returns the
    /// counters.
    pub fn run(mut self, cancel: CancellationToken) -> LoggerStats {
        info!(
            "Logging every {} line(s) to {}",
            self.decimator.period,
            self.log.path().display()
        );
        self.warm_up();

        while !cancel.is_cancelled() {
            match self.source.bytes_to_read() {
                Ok(0) => {
                    thread::sleep(self.idle_wait);
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("{}", e);
                    self.stats.read_errors += 1;
                    thread::sleep(self.idle_wait);
                    continue;
                }
            }

            self.sample();
        }

        info!(
            "Serial logger stopped: {} persisted, {} discarded, {} decode errors, {} read errors, {} write errors",
            self.stats.persisted,
            self.stats.discarded,
            self.stats.decode_errors,
            self.stats.read_errors,
            self.stats.write_errors
        );
        self.stats
    }

    /// Reads one available line and either persists or discards it.
    fn sample(&mut self) {
        let keep = self.decimator.tick();

        let line = match self.source.read_line() {
            Ok(line) => line,
            Err(e) => {
                // The counter already moved. If this tick was the one to
                // keep, its sample is lost and the next period starts over.
                if keep {
                    warn!("Sample lost to a read error");
                }
                error!("{}", e);
                self.stats.read_errors += 1;
                return;
            }
        };

        if !keep {
            self.stats.discarded += 1;
            return;
        }

        let entry = LogEntry::from_raw(Local::now(), &line);
        if entry.is_decode_error() {
            warn!("Serial line is not ASCII, recording decode error");
            self.stats.decode_errors += 1;
        }

        match self.log.append(&entry) {
            Ok(()) => {
                debug!("Logged: {}", entry.payload);
                self.stats.persisted += 1;
            }
            Err(e) => {
                error!("{}", e);
                self.stats.write_errors += 1;
            }
        }
    }
}
