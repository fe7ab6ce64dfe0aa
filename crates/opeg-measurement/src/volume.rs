//! Container volume normalization for water prices.
//!
//! The peg is calibrated to one liter. Shoppers report the price of the
//! container they actually saw, in whatever unit it is labelled with; the
//! price is pro-rated to a per-liter price here. Volumes are carried in
//! thousandths of the unit and converted through nano-liter factors so all
//! math stays integer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const NANO_PER_MICRO_LITER: u128 = 1_000;
const MICRO_LITERS_PER_LITER: u128 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VolumeUnit {
    Liters,
    Milliliters,
    /// US fluid ounce
    FluidOunces,
    GallonsUs,
    GallonsUk,
    /// US liquid pint
    Pints,
    /// US liquid quart
    Quarts,
}

impl VolumeUnit {
    /// Nano-liters in one whole unit
    pub fn nano_liters(self) -> u128 {
        match self {
            VolumeUnit::Liters => 1_000_000_000,
            VolumeUnit::Milliliters => 1_000_000,
            VolumeUnit::FluidOunces => 29_573_530,
            VolumeUnit::GallonsUs => 3_785_411_784,
            VolumeUnit::GallonsUk => 4_546_090_000,
            VolumeUnit::Pints => 473_176_473,
            VolumeUnit::Quarts => 946_352_946,
        }
    }
}

impl fmt::Display for VolumeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeUnit::Liters => "L",
            VolumeUnit::Milliliters => "mL",
            VolumeUnit::FluidOunces => "fl oz",
            VolumeUnit::GallonsUs => "US gal",
            VolumeUnit::GallonsUk => "UK gal",
            VolumeUnit::Pints => "pt",
            VolumeUnit::Quarts => "qt",
        };
        f.write_str(s)
    }
}

impl FromStr for VolumeUnit {
    type Err = String;

    /// Accepts the common label spellings, case-insensitive. A bare
    /// "gal" means the US gallon.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "liter" | "liters" | "litre" | "litres" => Ok(VolumeUnit::Liters),
            "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => Ok(VolumeUnit::Milliliters),
            "oz" | "fl oz" | "floz" | "fluid ounce" | "fluid ounces" => Ok(VolumeUnit::FluidOunces),
            "gal" | "gallon" | "gallons" | "us gal" | "us gallon" | "us gallons" => Ok(VolumeUnit::GallonsUs),
            "uk gal" | "uk gallon" | "uk gallons" | "imp gal" | "imperial gallon" => Ok(VolumeUnit::GallonsUk),
            "pt" | "pint" | "pints" => Ok(VolumeUnit::Pints),
            "qt" | "quart" | "quarts" => Ok(VolumeUnit::Quarts),
            other => Err(format!("unsupported volume unit: {}", other)),
        }
    }
}

/// Container volume as labelled: `amount_milli` thousandths of `unit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerVolume {
    pub amount_milli: u64,
    pub unit: VolumeUnit,
}

impl ContainerVolume {
    pub fn new(amount_milli: u64, unit: VolumeUnit) -> Self {
        Self { amount_milli, unit }
    }

    /// Exactly one liter
    pub fn liter() -> Self {
        Self::new(1_000, VolumeUnit::Liters)
    }

    /// Volume in micro-liters, rounded to nearest
    pub fn micro_liters(&self) -> u64 {
        let nano = self.amount_milli as u128 * self.unit.nano_liters() / 1_000;
        let micro = (nano + NANO_PER_MICRO_LITER / 2) / NANO_PER_MICRO_LITER;
        u64::try_from(micro).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for ContainerVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03} {}", self.amount_milli / 1_000, self.amount_milli % 1_000, self.unit)
    }
}

/// Pro-rate a container price to one liter, rounded to nearest.
/// `None` for an empty container or a result that does not fit in u64.
pub fn price_per_liter(container_price_micro: u64, volume_micro_liters: u64) -> Option<u64> {
    if volume_micro_liters == 0 {
        return None;
    }
    let volume = volume_micro_liters as u128;
    let scaled = container_price_micro as u128 * MICRO_LITERS_PER_LITER + volume / 2;
    u64::try_from(scaled / volume).ok()
}
