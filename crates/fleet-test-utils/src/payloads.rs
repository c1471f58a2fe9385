//! Raw payload builders in each system's wire shape.

use serde_json::{Value, json};

/// Deterministic serial number for device `n`.
pub fn serial(n: usize) -> String {
    format!("C02TEST{n:05}")
}

/// A Source A device in JSON:API shape.
pub fn source_a_device(
    serial: &str,
    added_to_org: &str,
    order_number: &str,
    purchase_source_id: &str,
) -> Value {
    json!({
        "type": "orgDevices",
        "id": serial,
        "attributes": {
            "serialNumber": serial,
            "addedToOrgDateTime": added_to_org,
            "orderNumber": order_number,
            "purchaseSourceId": purchase_source_id,
            "purchaseSourceType": "RESELLER",
            "deviceModel": "MacBook Pro 14-inch"
        }
    })
}

/// A Source B computer in the classic `computer.general` shape.
///
/// `None` purchasing values are sent as empty strings, the way the
/// inventory system reports unset fields.
pub fn source_b_computer(
    id: u64,
    serial: &str,
    vendor: Option<&str>,
    po_date: Option<&str>,
    po_number: Option<&str>,
) -> Value {
    json!({
        "computer": {
            "general": {
                "id": id,
                "name": format!("mac-{id}"),
                "serial_number": serial
            },
            "purchasing": {
                "purchased": true,
                "life_expectancy": 3,
                "vendor": vendor.unwrap_or(""),
                "po_date": po_date.unwrap_or(""),
                "po_number": po_number.unwrap_or("")
            }
        }
    })
}

/// `n` devices present in both systems with matching purchasing data.
///
/// Every device was added on 2021-11-25 by vendor `64AFCB0`, which the
/// caller is expected to map to `AMIRIM`.
pub fn synced_fleet(n: usize) -> (Vec<Value>, Vec<Value>) {
    (0..n)
        .map(|i| {
            let serial = serial(i);
            let order = format!("PO-{i:04}");
            (
                source_a_device(&serial, "2021-11-25T08:25:53.921Z", &order, "64AFCB0"),
                source_b_computer(
                    100 + i as u64,
                    &serial,
                    Some("AMIRIM"),
                    Some("2021-11-25"),
                    Some(&order),
                ),
            )
        })
        .unzip()
}
