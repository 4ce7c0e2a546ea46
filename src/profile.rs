use serde::Deserialize;

use crate::options::OptionSet;

pub const MIN_TEMP_F: f64 = 61.0;
pub const MAX_TEMP_F: f64 = 86.0;

const OFF: &str = "off";

const HEAT_PUMP_VOCABULARY: &[&str] = &[
    "Pow", "Mod", "CoWatOutTemSet", "HeWatOutTemSet", "WatBoxTemSet", "ColHtWter", "HetHtWter",
    "AllErr", "Quiet", "WatBoxExt", "Emegcy", "AllInWatTemHi", "AllInWatTemLo", "AllOutWatTemHi",
    "AllOutWatTemLo", "HepOutWatTemHi", "HepOutWatTemLo", "WatBoxTemHi", "WatBoxTemLo",
    "RmoHomTemHi", "RmoHomTemLo", "WatBoxElcHeRunSta", "SyAnFroRunSta", "ElcHe1RunSta",
    "ElcHe2RunSta", "AnFrzzRunSta",
];

const HEAT_PUMP_WRITABLE: &[&str] = &[
    "Pow", "Mod", "CoWatOutTemSet", "HeWatOutTemSet", "WatBoxTemSet", "Quiet",
];

const AC_VOCABULARY: &[&str] = &[
    "Pow", "Mod", "SetTem", "WdSpd", "Air", "Blo", "Health", "SwhSlp", "Lig", "SwingLfRig",
    "SwUpDn", "Quiet", "Tur", "StHt", "TemUn", "HeatCoolType", "TemRec", "SvSt", "SlpMod",
    "TemSen", "OutEnvTem",
];

const AC_WRITABLE: &[&str] = &[
    "Pow", "Mod", "SetTem", "WdSpd", "Air", "Blo", "Health", "SwhSlp", "Lig", "SwingLfRig",
    "SwUpDn", "Quiet", "Tur", "StHt", "TemUn", "TemRec", "SvSt", "SlpMod",
];

fn default_power_register() -> String {
    "Pow".to_string()
}

fn default_mode_register() -> String {
    "Mod".to_string()
}

/// Mapping between mode names and the values of the mode register.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModeTable {
    #[serde(default = "default_power_register")]
    pub power_register: String,
    #[serde(default = "default_mode_register")]
    pub mode_register: String,
    pub modes: Vec<(String, i64)>,
}

impl ModeTable {
    pub fn new(modes: &[(&str, i64)]) -> Self {
        Self {
            power_register: default_power_register(),
            mode_register: default_mode_register(),
            modes: modes.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        }
    }

    /// "off" when powered down, otherwise the entry matching the mode register.
    pub fn resolve(&self, options: &OptionSet) -> Option<String> {
        if options.get(&self.power_register) == Some(0) {
            return Some(OFF.to_string());
        }
        let value = options.get(&self.mode_register)?;
        self.modes
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(name, _)| name.clone())
    }

    /// Register writes that select `mode`. `"off"` only drops power.
    pub fn overrides_for(&self, mode: &str) -> Option<Vec<(String, i64)>> {
        if mode == OFF {
            return Some(vec![(self.power_register.clone(), 0)]);
        }
        let (_, value) = self.modes.iter().find(|(name, _)| name == mode)?;
        Some(vec![
            (self.power_register.clone(), 1),
            (self.mode_register.clone(), *value),
        ])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modes.iter().map(|(n, _)| n.as_str())
    }
}

/// A writable set point, stored on the device in whole Celsius.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub register: String,
    pub min_c: f64,
    pub max_c: f64,
    /// Half-degree bit written alongside Fahrenheit set points (`TemRec`).
    #[serde(default)]
    pub fraction_register: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorEncoding {
    Direct,
    Composite,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorSpec {
    pub name: String,
    pub register: String,
    pub encoding: SensorEncoding,
    /// Pass readings through the sensor offset resolver.
    #[serde(default)]
    pub calibrated: bool,
}

/// Register vocabulary and display mapping for one family of devices.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub vocabulary: Vec<String>,
    pub writable: Vec<String>,
    pub modes: ModeTable,
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl DeviceProfile {
    /// Air-to-water heat pump with a domestic hot water tank.
    pub fn heat_pump() -> Self {
        Self {
            name: "heat_pump".to_string(),
            vocabulary: strings(HEAT_PUMP_VOCABULARY),
            writable: strings(HEAT_PUMP_WRITABLE),
            modes: ModeTable::new(&[
                ("off", 0),
                ("temp", 1),
                ("boiler", 2),
                ("temp1", 3),
                ("boiler_heating", 4),
                ("temp2", 5),
            ]),
            targets: vec![
                TargetSpec {
                    name: "boiler".to_string(),
                    register: "WatBoxTemSet".to_string(),
                    min_c: 30.0,
                    max_c: 60.0,
                    fraction_register: None,
                },
                TargetSpec {
                    name: "radiator".to_string(),
                    register: "HeWatOutTemSet".to_string(),
                    min_c: 35.0,
                    max_c: 60.0,
                    fraction_register: None,
                },
            ],
            sensors: vec![
                SensorSpec {
                    name: "boiler".to_string(),
                    register: "WatBoxTemHi".to_string(),
                    encoding: SensorEncoding::Composite,
                    calibrated: false,
                },
                SensorSpec {
                    name: "radiator".to_string(),
                    register: "AllOutWatTemHi".to_string(),
                    encoding: SensorEncoding::Composite,
                    calibrated: true,
                },
            ],
        }
    }

    /// Split air conditioner.
    pub fn air_conditioner() -> Self {
        Self {
            name: "air_conditioner".to_string(),
            vocabulary: strings(AC_VOCABULARY),
            writable: strings(AC_WRITABLE),
            modes: ModeTable::new(&[
                ("auto", 0),
                ("cool", 1),
                ("dry", 2),
                ("fan_only", 3),
                ("heat", 4),
            ]),
            targets: vec![TargetSpec {
                name: "target".to_string(),
                register: "SetTem".to_string(),
                min_c: 16.0,
                max_c: 30.0,
                fraction_register: Some("TemRec".to_string()),
            }],
            sensors: vec![
                SensorSpec {
                    name: "indoor".to_string(),
                    register: "TemSen".to_string(),
                    encoding: SensorEncoding::Direct,
                    calibrated: true,
                },
                SensorSpec {
                    name: "outdoor".to_string(),
                    register: "OutEnvTem".to_string(),
                    encoding: SensorEncoding::Direct,
                    calibrated: true,
                },
            ],
        }
    }

    pub fn target(&self, name: &str) -> Option<&TargetSpec> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn option_set(&self) -> OptionSet {
        OptionSet::with_vocabulary(self.vocabulary.iter().cloned())
    }
}
