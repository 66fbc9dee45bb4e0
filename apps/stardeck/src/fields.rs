use crate::storage::StoreError;

/// The closed set of fields on a starship sheet.
///
/// Each field has two names: the camelCase wire name used on the protocol and
/// in API payloads, and the snake_case column name used by the store. Both
/// directions of the mapping come from the same per-variant tables, and
/// `from_wire` is derived from `wire_name`, so the wire/storage translation
/// round-trips for every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SheetField {
    ShipName,
    ShipClass,
    ShipDesc,
    ArmorClass,
    HitPoints,
    Shields,
    ReflexSave,
    FortSave,
    Captain,
    Engineer,
    Gunner,
    MagicOfficer,
    Pilot,
    ScienceOfficer,
    MedicalOfficer,
    Bonuses,
    Description,
    Notes,
}

impl SheetField {
    pub const ALL: [SheetField; 18] = [
        SheetField::ShipName,
        SheetField::ShipClass,
        SheetField::ShipDesc,
        SheetField::ArmorClass,
        SheetField::HitPoints,
        SheetField::Shields,
        SheetField::ReflexSave,
        SheetField::FortSave,
        SheetField::Captain,
        SheetField::Engineer,
        SheetField::Gunner,
        SheetField::MagicOfficer,
        SheetField::Pilot,
        SheetField::ScienceOfficer,
        SheetField::MedicalOfficer,
        SheetField::Bonuses,
        SheetField::Description,
        SheetField::Notes,
    ];

    /// Name used on the wire protocol and in API bodies.
    pub fn wire_name(self) -> &'static str {
        match self {
            SheetField::ShipName => "shipName",
            SheetField::ShipClass => "shipClass",
            SheetField::ShipDesc => "shipDesc",
            SheetField::ArmorClass => "armorClass",
            SheetField::HitPoints => "hitPoints",
            SheetField::Shields => "shields",
            SheetField::ReflexSave => "reflexSave",
            SheetField::FortSave => "fortSave",
            SheetField::Captain => "captain",
            SheetField::Engineer => "engineer",
            SheetField::Gunner => "gunner",
            SheetField::MagicOfficer => "magicOfficer",
            SheetField::Pilot => "pilot",
            SheetField::ScienceOfficer => "scienceOfficer",
            SheetField::MedicalOfficer => "medicalOfficer",
            SheetField::Bonuses => "bonuses",
            SheetField::Description => "description",
            SheetField::Notes => "notes",
        }
    }

    /// Column name used by the sheet store.
    pub fn column(self) -> &'static str {
        match self {
            SheetField::ShipName => "ship_name",
            SheetField::ShipClass => "ship_class",
            SheetField::ShipDesc => "ship_desc",
            SheetField::ArmorClass => "armor_class",
            SheetField::HitPoints => "hit_points",
            SheetField::Shields => "shields",
            SheetField::ReflexSave => "reflex_save",
            SheetField::FortSave => "fort_save",
            SheetField::Captain => "captain",
            SheetField::Engineer => "engineer",
            SheetField::Gunner => "gunner",
            SheetField::MagicOfficer => "magic_officer",
            SheetField::Pilot => "pilot",
            SheetField::ScienceOfficer => "science_officer",
            SheetField::MedicalOfficer => "medical_officer",
            SheetField::Bonuses => "bonuses",
            SheetField::Description => "description",
            SheetField::Notes => "notes",
        }
    }

    /// Look up a field by its wire name. The field set is closed; anything
    /// outside it is rejected.
    pub fn from_wire(name: &str) -> Result<Self, StoreError> {
        Self::ALL
            .into_iter()
            .find(|field| field.wire_name() == name)
            .ok_or_else(|| StoreError::InvalidField(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn wire_names_round_trip() {
        for field in SheetField::ALL {
            assert_eq!(SheetField::from_wire(field.wire_name()).unwrap(), field);
        }
    }

    #[test]
    fn mapping_is_injective() {
        let wire: HashSet<&str> = SheetField::ALL.iter().map(|f| f.wire_name()).collect();
        let columns: HashSet<&str> = SheetField::ALL.iter().map(|f| f.column()).collect();
        assert_eq!(wire.len(), SheetField::ALL.len());
        assert_eq!(columns.len(), SheetField::ALL.len());
    }

    #[test]
    fn unknown_wire_name_is_rejected() {
        let err = SheetField::from_wire("warpCoreStatus").unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(name) if name == "warpCoreStatus"));
    }

    #[test]
    fn storage_names_are_not_accepted_on_the_wire() {
        // snake_case is the store's convention, not the protocol's
        assert!(SheetField::from_wire("ship_name").is_err());
    }
}
