// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
use crate::driver::error::DriverError;

/// Parsed Sound Blaster device settings.
///
/// The canonical source is the `BLASTER` environment string, e.g.
/// `"A220 I5 D1 H5"`: base I/O address in hex after `A`, IRQ line after `I`,
/// and the 16-bit (high) DMA channel after `H`. Fields may appear in any
/// order and unknown fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlasterConfig {
    /// Base I/O port address, e.g. 0x220.
    pub base: u16,
    /// IRQ line, 0..15.
    pub irq: u8,
    /// 16-bit DMA channel, normally 5..7.
    pub dma: u8,
}

impl BlasterConfig {
    /// Reads and parses the `BLASTER` environment variable. An absent
    /// variable and a malformed one fail distinctly.
    pub fn from_env() -> Result<BlasterConfig, DriverError> {
        match std::env::var("BLASTER") {
            Ok(value) => BlasterConfig::parse(&value),
            Err(_) => Err(DriverError::NotConfigured),
        }
    }

    /// Parses a BLASTER-style settings string.
    pub fn parse(s: &str) -> Result<BlasterConfig, DriverError> {
        let mut base = None;
        let mut irq = None;
        let mut dma = None;

        for field in s.split_whitespace() {
            let Some(rest) = field.get(1..) else {
                continue;
            };
            match field.as_bytes()[0] {
                b'A' => {
                    base = Some(
                        u16::from_str_radix(rest, 16)
                            .map_err(|_| DriverError::InvalidConfig("bad base address"))?,
                    );
                }
                b'I' => {
                    irq = Some(
                        rest.parse::<u8>()
                            .map_err(|_| DriverError::InvalidConfig("bad IRQ"))?,
                    );
                }
                b'H' => {
                    dma = Some(
                        rest.parse::<u8>()
                            .map_err(|_| DriverError::InvalidConfig("bad DMA channel"))?,
                    );
                }
                _ => {}
            }
        }

        let base = base.ok_or(DriverError::InvalidConfig("missing base address"))?;
        let irq = irq.ok_or(DriverError::InvalidConfig("missing IRQ"))?;
        let dma = dma.ok_or(DriverError::InvalidConfig("missing DMA channel"))?;

        if irq > 15 {
            return Err(DriverError::InvalidConfig("IRQ out of range"));
        }
        if dma > 7 {
            return Err(DriverError::InvalidConfig("DMA channel out of range"));
        }

        Ok(BlasterConfig { base, irq, dma })
    }
}
