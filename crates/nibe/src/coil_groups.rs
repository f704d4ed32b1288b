// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static per-series coil groups.
//!
//! These map logical concepts (climate system S1, hot water, fans) to
//! the register addresses that implement them on each firmware family.
//! The tables are compile-time constants; an address is only usable if
//! the loaded model's table actually defines it.

use crate::heatpump::Series;

/// Pump-wide status and control addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitCoilGroup {
    pub name: &'static str,
    pub prio: u16,
    pub cooling_with_room_sensor: u16,
    pub alarm: u16,
    pub alarm_reset: u16,
}

/// Addresses of one climate system (S1..S4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClimateCoilGroup {
    pub name: &'static str,
    pub active_accessory: Option<u16>,
    pub current: u16,
    pub setpoint_heat: u16,
    pub setpoint_cool: u16,
    pub mixing_valve_state: u16,
    pub use_room_sensor: u16,
}

/// Hot water addresses; start/stop temperatures are keyed by comfort
/// mode (ECONOMY/NORMAL/LUXURY on F, LOW/NORMAL/HIGH on S).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterHeaterCoilGroup {
    pub name: &'static str,
    pub hot_water_load: u16,
    pub hot_water_comfort_mode: u16,
    pub start_temperature: &'static [(&'static str, u16)],
    pub stop_temperature: &'static [(&'static str, u16)],
    pub active_accessory: Option<u16>,
    pub temporary_lux: Option<u16>,
}

impl WaterHeaterCoilGroup {
    #[must_use]
    pub fn start_temperature_for(&self, comfort_mode: &str) -> Option<u16> {
        lookup(self.start_temperature, comfort_mode)
    }

    #[must_use]
    pub fn stop_temperature_for(&self, comfort_mode: &str) -> Option<u16> {
        lookup(self.stop_temperature, comfort_mode)
    }
}

/// Fan control addresses with their five speed presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanCoilGroup {
    pub name: &'static str,
    pub speed: Option<u16>,
    pub speeds: &'static [(&'static str, u16)],
}

impl FanCoilGroup {
    #[must_use]
    pub fn speed_for(&self, preset: &str) -> Option<u16> {
        lookup(self.speeds, preset)
    }
}

fn lookup(table: &[(&str, u16)], key: &str) -> Option<u16> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|&(_, address)| address)
}

const UNIT_COILGROUPS_F: &[(&str, UnitCoilGroup)] = &[(
    "main",
    UnitCoilGroup {
        name: "Main",
        prio: 43086,
        cooling_with_room_sensor: 47340,
        alarm: 45001,
        alarm_reset: 45171,
    },
)];

const UNIT_COILGROUPS_S: &[(&str, UnitCoilGroup)] = &[(
    "main",
    UnitCoilGroup {
        name: "Main",
        prio: 31029,
        cooling_with_room_sensor: 40171,
        alarm: 31976,
        alarm_reset: 40023,
    },
)];

const CLIMATE_COILGROUPS_F: &[(&str, ClimateCoilGroup)] = &[
    (
        "s1",
        ClimateCoilGroup {
            name: "Climate System S1",
            current: 40033,
            setpoint_heat: 47398,
            setpoint_cool: 48785,
            mixing_valve_state: 43096,
            active_accessory: None,
            use_room_sensor: 47394,
        },
    ),
    (
        "s2",
        ClimateCoilGroup {
            name: "Climate System S2",
            current: 40032,
            setpoint_heat: 47397,
            setpoint_cool: 48784,
            mixing_valve_state: 43095,
            active_accessory: Some(47302),
            use_room_sensor: 47393,
        },
    ),
    (
        "s3",
        ClimateCoilGroup {
            name: "Climate System S3",
            current: 40031,
            setpoint_heat: 47396,
            setpoint_cool: 48783,
            mixing_valve_state: 43094,
            active_accessory: Some(47303),
            use_room_sensor: 47392,
        },
    ),
    (
        "s4",
        ClimateCoilGroup {
            name: "Climate System S4",
            current: 40030,
            setpoint_heat: 47395,
            setpoint_cool: 48782,
            mixing_valve_state: 43093,
            active_accessory: Some(47304),
            use_room_sensor: 47391,
        },
    ),
];

const CLIMATE_COILGROUPS_S: &[(&str, ClimateCoilGroup)] = &[
    (
        "s1",
        ClimateCoilGroup {
            name: "Climate System S1",
            current: 30027,
            setpoint_heat: 40207,
            setpoint_cool: 40989,
            mixing_valve_state: 31034,
            active_accessory: None,
            use_room_sensor: 40203,
        },
    ),
    (
        "s2",
        ClimateCoilGroup {
            name: "Climate System S2",
            current: 30026,
            setpoint_heat: 40206,
            setpoint_cool: 40988,
            mixing_valve_state: 31033,
            active_accessory: None,
            use_room_sensor: 40202,
        },
    ),
    (
        "s3",
        ClimateCoilGroup {
            name: "Climate System S3",
            current: 30025,
            setpoint_heat: 40205,
            setpoint_cool: 40987,
            mixing_valve_state: 31032,
            active_accessory: None,
            use_room_sensor: 40201,
        },
    ),
    (
        "s4",
        ClimateCoilGroup {
            name: "Climate System S4",
            current: 30024,
            setpoint_heat: 40204,
            setpoint_cool: 40986,
            mixing_valve_state: 31031,
            active_accessory: None,
            use_room_sensor: 40200,
        },
    ),
];

const WATER_HEATER_COILGROUPS_F: &[(&str, WaterHeaterCoilGroup)] = &[(
    "hw1",
    WaterHeaterCoilGroup {
        name: "Hot Water",
        hot_water_load: 40014,
        hot_water_comfort_mode: 47041,
        start_temperature: &[("ECONOMY", 47045), ("NORMAL", 47044), ("LUXURY", 47043)],
        stop_temperature: &[("ECONOMY", 47049), ("NORMAL", 47048), ("LUXURY", 47047)],
        active_accessory: None,
        temporary_lux: Some(48132),
    },
)];

const WATER_HEATER_COILGROUPS_S: &[(&str, WaterHeaterCoilGroup)] = &[(
    "hw1",
    WaterHeaterCoilGroup {
        name: "Hot Water",
        hot_water_load: 30010,
        hot_water_comfort_mode: 31039,
        start_temperature: &[("LOW", 40061), ("NORMAL", 40060), ("HIGH", 40059)],
        stop_temperature: &[("LOW", 40065), ("NORMAL", 40064), ("HIGH", 40063)],
        active_accessory: None,
        temporary_lux: None,
    },
)];

const FAN_COILGROUPS_F: &[(&str, FanCoilGroup)] = &[
    (
        "exhaust",
        FanCoilGroup {
            name: "Exhaust",
            speed: Some(47260),
            speeds: &[
                ("0", 47265),
                ("1", 47264),
                ("2", 47263),
                ("3", 47262),
                ("4", 47261),
            ],
        },
    ),
    (
        "supply",
        FanCoilGroup {
            name: "Supply",
            speed: Some(47260),
            speeds: &[
                ("0", 47270),
                ("1", 47269),
                ("2", 47268),
                ("3", 47267),
                ("4", 47266),
            ],
        },
    ),
];

const FAN_COILGROUPS_S: &[(&str, FanCoilGroup)] = &[];

/// Unit groups for a series, keyed by logical name.
#[must_use]
pub fn unit_coil_groups(series: Series) -> &'static [(&'static str, UnitCoilGroup)] {
    match series {
        Series::F => UNIT_COILGROUPS_F,
        Series::S => UNIT_COILGROUPS_S,
        Series::Custom => &[],
    }
}

/// Climate system groups for a series, keyed by "s1".."s4".
#[must_use]
pub fn climate_coil_groups(series: Series) -> &'static [(&'static str, ClimateCoilGroup)] {
    match series {
        Series::F => CLIMATE_COILGROUPS_F,
        Series::S => CLIMATE_COILGROUPS_S,
        Series::Custom => &[],
    }
}

/// Water heater groups for a series.
#[must_use]
pub fn water_heater_coil_groups(series: Series) -> &'static [(&'static str, WaterHeaterCoilGroup)] {
    match series {
        Series::F => WATER_HEATER_COILGROUPS_F,
        Series::S => WATER_HEATER_COILGROUPS_S,
        Series::Custom => &[],
    }
}

/// Fan groups for a series (none on S pumps).
#[must_use]
pub fn fan_coil_groups(series: Series) -> &'static [(&'static str, FanCoilGroup)] {
    match series {
        Series::F => FAN_COILGROUPS_F,
        Series::S => FAN_COILGROUPS_S,
        Series::Custom => &[],
    }
}

/// One unit group by key.
#[must_use]
pub fn unit_coil_group(series: Series, key: &str) -> Option<&'static UnitCoilGroup> {
    find(unit_coil_groups(series), key)
}

/// One climate system group by key.
#[must_use]
pub fn climate_coil_group(series: Series, key: &str) -> Option<&'static ClimateCoilGroup> {
    find(climate_coil_groups(series), key)
}

/// One water heater group by key.
#[must_use]
pub fn water_heater_coil_group(series: Series, key: &str) -> Option<&'static WaterHeaterCoilGroup> {
    find(water_heater_coil_groups(series), key)
}

/// One fan group by key.
#[must_use]
pub fn fan_coil_group(series: Series, key: &str) -> Option<&'static FanCoilGroup> {
    find(fan_coil_groups(series), key)
}

fn find<T>(table: &'static [(&'static str, T)], key: &str) -> Option<&'static T> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, group)| group)
}
