//! A small built-in device database keyed by the manufacturer triple.
//! A miss is not an error; the node keeps generic labels derived from
//! its device class.

pub struct DeviceEntry {
    pub manufacturer_id: u16,
    pub product_type: u16,
    pub product_id: u16,
    pub manufacturer_name: &'static str,
    pub product_name: &'static str,
}

static DEVICES: &[DeviceEntry] = &[
    DeviceEntry {
        manufacturer_id: 0x0086,
        product_type: 0x0003,
        product_id: 0x0006,
        manufacturer_name: "Aeon Labs",
        product_name: "Smart Energy Switch",
    },
    DeviceEntry {
        manufacturer_id: 0x0086,
        product_type: 0x0002,
        product_id: 0x0005,
        manufacturer_name: "Aeon Labs",
        product_name: "MultiSensor",
    },
    DeviceEntry {
        manufacturer_id: 0x010f,
        product_type: 0x0400,
        product_id: 0x0102,
        manufacturer_name: "Fibaro",
        product_name: "FGS-211 Relay Switch",
    },
    DeviceEntry {
        manufacturer_id: 0x010f,
        product_type: 0x0800,
        product_id: 0x1001,
        manufacturer_name: "Fibaro",
        product_name: "FGMS-001 Motion Sensor",
    },
    DeviceEntry {
        manufacturer_id: 0x0063,
        product_type: 0x4952,
        product_id: 0x3031,
        manufacturer_name: "GE",
        product_name: "45609 On/Off Relay Switch",
    },
    DeviceEntry {
        manufacturer_id: 0x001d,
        product_type: 0x0101,
        product_id: 0x0334,
        manufacturer_name: "Leviton",
        product_name: "VRS15 Scene Capable Switch",
    },
];

pub fn manufacturer_name(manufacturer_id: u16) -> Option<&'static str> {
    DEVICES
        .iter()
        .find(|entry| entry.manufacturer_id == manufacturer_id)
        .map(|entry| entry.manufacturer_name)
}

pub fn lookup(manufacturer_id: u16, product_type: u16, product_id: u16) -> Option<&'static DeviceEntry> {
    DEVICES.iter().find(|entry| {
        entry.manufacturer_id == manufacturer_id
            && entry.product_type == product_type
            && entry.product_id == product_id
    })
}

#[test]
fn test_lookup() {
    let entry = lookup(0x0086, 0x0003, 0x0006).unwrap();
    assert_eq!(entry.product_name, "Smart Energy Switch");
    assert!(lookup(0xffff, 0, 0).is_none());
    // Manufacturer-only fallback for unknown products
    assert_eq!(manufacturer_name(0x010f), Some("Fibaro"));
}
