use super::*;

fn control(id: &str, iterator: &str, manual: Option<i64>) -> ControlData {
    serde_json::from_value(json!({
        "controlId": id,
        "location": { "pageNumber": 2, "row": 1, "column": 3 },
        "options": {
            "controlType": "Dial",
            "iterator": iterator,
            "manualIteration": manual,
        },
    }))
    .expect("control data")
}

#[derive(Default)]
struct Silent;

#[async_trait]
impl ControlBehavior for Silent {}

#[test]
fn rgb_components_are_clamped_and_packed() {
    assert_eq!(rgb_to_int(1.0, 0.0, 0.0), 0xFF0000);
    assert_eq!(rgb_to_int(0.0, 1.0, 0.0), 0x00FF00);
    assert_eq!(rgb_to_int(2.0, -1.0, 0.5), 0xFF0080);
}

#[test]
fn manual_controls_take_their_configured_iteration() {
    let info = ControlInfo::from_data(&control("c1", "manual", Some(7)), "Dial");
    assert_eq!(info.iteration, 7);
    assert_eq!(info.page, 2);
    assert_eq!(info.position, GridPosition::new(1, 3));
    assert_eq!(info.location_text(), "2/1/3");

    let unset = ControlInfo::from_data(&control("c2", "", None), "Dial");
    assert_eq!(unset.iterator, IteratorMode::Manual);
    assert_eq!(unset.iteration, 0);
}

#[test]
fn applying_data_keeps_computed_iteration_for_other_modes() {
    let mut info = ControlInfo::from_data(&control("c1", "pagelrtb", Some(3)), "Dial");
    info.iteration = 5;
    info.apply(&control("c1", "pagelrtb", Some(9)));
    assert_eq!(info.iteration, 5);
    assert_eq!(info.manual_iteration, Some(9));

    info.apply(&control("c1", "manual", Some(9)));
    assert_eq!(info.iteration, 9);
}

#[test]
fn registry_rejects_duplicate_tags() {
    let mut types = ControlTypeRegistry::new();
    types.register_default::<Silent>("Dial").expect("first");
    assert_eq!(
        types.register_default::<Silent>("Dial"),
        Err(ConfigError::DuplicateControlType("Dial".into()))
    );
    assert!(types.contains("Dial"));
    assert!(!types.contains("Fader"));
}

#[test]
fn registry_builds_behaviors_from_control_info() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut types = ControlTypeRegistry::new();
    {
        let seen = Arc::clone(&seen);
        types
            .register("Dial", move |info: &ControlInfo| {
                seen.lock().expect("seen").push(info.control_id.clone());
                Silent
            })
            .expect("register");
    }

    let info = ControlInfo::from_data(&control("c9", "row", None), "Dial");
    assert!(types.build("Dial", &info).is_some());
    assert!(types.build("Fader", &info).is_none());
    assert_eq!(*seen.lock().expect("seen"), vec![ControlId::from("c9")]);
}
