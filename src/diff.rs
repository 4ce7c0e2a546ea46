use serde_json::Value;

use crate::options::OptionChange;
use crate::types::*;

pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(&Value::Object(serde_json::Map::new()), curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

pub(crate) fn option_events(changes: &[OptionChange]) -> Vec<Event> {
    changes
        .iter()
        .map(|c| Event::OptionChanged {
            name: c.name.clone(),
            old: c.old,
            new: c.new,
        })
        .collect()
}

/// Typed events for every derived value that differs between two snapshots.
/// Availability is reported separately, on transitions only.
pub(crate) fn state_events(previous: &DeviceState, current: &DeviceState) -> Vec<Event> {
    let mut events = Vec::new();

    if current.power != previous.power
        && let Some(on) = current.power
    {
        events.push(Event::PowerChanged { on });
    }
    if current.mode != previous.mode {
        events.push(Event::ModeChanged {
            mode: current.mode.clone(),
        });
    }
    for (name, value) in &current.targets {
        if previous.targets.get(name) != Some(value) {
            events.push(Event::TargetTemperatureChanged {
                name: name.clone(),
                value: *value,
            });
        }
    }
    for (name, value) in &current.sensors {
        if previous.sensors.get(name) != Some(value) {
            events.push(Event::SensorTemperatureChanged {
                name: name.clone(),
                value: *value,
            });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_detects_leaf_change() {
        let prev = json!({"t": "dat", "dat": [1, 4]});
        let curr = json!({"t": "dat", "dat": [1, 2]});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "dat");
        assert_eq!(changes[0].1, json!([1, 4]));
        assert_eq!(changes[0].2, json!([1, 2]));
    }

    #[test]
    fn diff_ignores_unchanged() {
        let val = json!({"t": "dat", "mac": "f4911eaabbcc", "dat": [0]});
        let mut changes = vec![];
        diff_json(&val, &val, "", &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn diff_detects_new_key() {
        let prev = json!({"t": "dat"});
        let curr = json!({"t": "dat", "r": 200});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "r");
        assert_eq!(changes[0].1, Value::Null);
    }

    #[test]
    fn option_changes_become_events() {
        let events = option_events(&[OptionChange {
            name: "Mod".to_string(),
            old: Some(1),
            new: Some(4),
        }]);
        assert_eq!(
            events,
            vec![Event::OptionChanged {
                name: "Mod".to_string(),
                old: Some(1),
                new: Some(4),
            }]
        );
    }

    #[test]
    fn first_snapshot_reports_everything_known() {
        let mut current = DeviceState {
            power: Some(true),
            mode: Some("heat".to_string()),
            ..Default::default()
        };
        current.targets.insert("target".to_string(), 24.0);
        current.sensors.insert("indoor".to_string(), 21.0);

        let events = state_events(&DeviceState::default(), &current);
        assert_eq!(events.len(), 4);
        assert!(events.contains(&Event::PowerChanged { on: true }));
        assert!(events.contains(&Event::ModeChanged {
            mode: Some("heat".to_string())
        }));
    }

    #[test]
    fn unchanged_snapshot_is_quiet() {
        let mut state = DeviceState {
            power: Some(false),
            mode: Some("off".to_string()),
            ..Default::default()
        };
        state.sensors.insert("boiler".to_string(), 45.0);
        assert!(state_events(&state, &state.clone()).is_empty());
    }

    #[test]
    fn sensor_change_only() {
        let mut previous = DeviceState::default();
        previous.sensors.insert("outdoor".to_string(), 8.0);
        let mut current = previous.clone();
        current.sensors.insert("outdoor".to_string(), 7.0);
        assert_eq!(
            state_events(&previous, &current),
            vec![Event::SensorTemperatureChanged {
                name: "outdoor".to_string(),
                value: 7.0,
            }]
        );
    }
}
