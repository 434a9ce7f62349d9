/// Compiled-in OUI prefix table.
///
/// A small cut of the IEEE registry covering vendors that dominate
/// nearby-device captures: phone and laptop makers, common AP and SBC
/// vendors, and IoT radio modules. Misses fall through to the HTTP
/// resolver when one is configured.

/// Known OUI prefixes (3-byte prefix, vendor name).
pub static OUI_PREFIXES: &[([u8; 3], &str)] = &[
    // === Apple ===
    ([0x00, 0x03, 0x93], "Apple, Inc."),
    ([0x00, 0x16, 0xCB], "Apple, Inc."),
    ([0x00, 0x26, 0xBB], "Apple, Inc."),
    ([0x3C, 0x07, 0x54], "Apple, Inc."),
    ([0xA8, 0x66, 0x7F], "Apple, Inc."),
    ([0xAC, 0xBC, 0x32], "Apple, Inc."),
    ([0xF0, 0x18, 0x98], "Apple, Inc."),
    ([0xF4, 0x5C, 0x89], "Apple, Inc."),
    // === Samsung ===
    ([0x00, 0x12, 0xFB], "Samsung Electronics"),
    ([0x00, 0x15, 0x99], "Samsung Electronics"),
    ([0x5C, 0x0A, 0x5B], "Samsung Electronics"),
    ([0x8C, 0x77, 0x12], "Samsung Electronics"),
    // === Intel ===
    ([0x00, 0x02, 0xB3], "Intel Corporation"),
    ([0x00, 0x13, 0x02], "Intel Corporation"),
    ([0x3C, 0xA9, 0xF4], "Intel Corporation"),
    ([0x8C, 0xA9, 0x82], "Intel Corporation"),
    ([0xA4, 0x4E, 0x31], "Intel Corporation"),
    // === Google / Nest ===
    ([0x18, 0xB4, 0x30], "Nest Labs"),
    ([0x3C, 0x5A, 0xB4], "Google, Inc."),
    ([0x54, 0x60, 0x09], "Google, Inc."),
    ([0xF4, 0xF5, 0xD8], "Google, Inc."),
    // === Amazon ===
    ([0x44, 0x65, 0x0D], "Amazon Technologies"),
    ([0x74, 0xC2, 0x46], "Amazon Technologies"),
    ([0xF0, 0x27, 0x2D], "Amazon Technologies"),
    // === Cisco / Meraki / Linksys ===
    ([0x00, 0x00, 0x0C], "Cisco Systems"),
    ([0x00, 0x40, 0x96], "Cisco Systems"),
    ([0x00, 0x18, 0x0A], "Cisco Meraki"),
    ([0x88, 0x15, 0x44], "Cisco Meraki"),
    ([0x00, 0x12, 0x17], "Cisco-Linksys"),
    ([0x00, 0x21, 0x29], "Cisco-Linksys"),
    // === Aruba ===
    ([0x00, 0x0B, 0x86], "Aruba Networks"),
    ([0x00, 0x1A, 0x1E], "Aruba Networks"),
    ([0x00, 0x24, 0x6C], "Aruba Networks"),
    ([0x24, 0xDE, 0xC6], "Aruba Networks"),
    ([0xD8, 0xC7, 0xC8], "Aruba Networks"),
    // === Ubiquiti ===
    ([0x18, 0xE8, 0x29], "Ubiquiti Networks"),
    ([0x24, 0xA4, 0x3C], "Ubiquiti Networks"),
    ([0xDC, 0x9F, 0xDB], "Ubiquiti Networks"),
    ([0xF0, 0x9F, 0xC2], "Ubiquiti Networks"),
    ([0xFC, 0xEC, 0xDA], "Ubiquiti Networks"),
    // === TP-Link ===
    ([0x14, 0xCC, 0x20], "TP-Link Technologies"),
    ([0x50, 0xC7, 0xBF], "TP-Link Technologies"),
    ([0xEC, 0x08, 0x6B], "TP-Link Technologies"),
    ([0xF4, 0xF2, 0x6D], "TP-Link Technologies"),
    // === Netgear ===
    ([0x00, 0x14, 0x6C], "Netgear"),
    ([0x20, 0x4E, 0x7F], "Netgear"),
    ([0xA0, 0x40, 0xA0], "Netgear"),
    // === Espressif ===
    ([0x24, 0x0A, 0xC4], "Espressif"),
    ([0x30, 0xAE, 0xA4], "Espressif"),
    ([0x3C, 0x61, 0x05], "Espressif"),
    ([0x84, 0x0D, 0x8E], "Espressif"),
    // === Raspberry Pi ===
    ([0xB8, 0x27, 0xEB], "Raspberry Pi Foundation"),
    ([0xDC, 0xA6, 0x32], "Raspberry Pi Trading"),
    ([0xE4, 0x5F, 0x01], "Raspberry Pi Trading"),
    // === Sonos ===
    ([0x00, 0x0E, 0x58], "Sonos"),
    ([0x5C, 0xAA, 0xFD], "Sonos"),
    ([0x94, 0x9F, 0x3E], "Sonos"),
    // === Huawei ===
    ([0x00, 0x25, 0x9E], "Huawei Technologies"),
    ([0x00, 0xE0, 0xFC], "Huawei Technologies"),
    ([0x48, 0xDB, 0x50], "Huawei Technologies"),
    // === Xiaomi ===
    ([0x28, 0x6C, 0x07], "Xiaomi Communications"),
    ([0x64, 0x09, 0x80], "Xiaomi Communications"),
    // === Misc ===
    ([0x00, 0x11, 0x32], "Synology"),
    ([0x00, 0x09, 0x0F], "Fortinet"),
    ([0x00, 0x15, 0x5D], "Microsoft"),
    ([0x00, 0x50, 0xF2], "Microsoft"),
];

/// Look up the vendor for an OUI prefix.
pub fn lookup(oui: &[u8; 3]) -> Option<&'static str> {
    OUI_PREFIXES
        .iter()
        .find(|(prefix, _)| prefix == oui)
        .map(|&(_, vendor)| vendor)
}
