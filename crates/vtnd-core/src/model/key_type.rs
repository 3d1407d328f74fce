// ── Key types ──
//
// Every configuration object kind the engine knows about. The containment
// hierarchy between them lives in `crate::keytree`; this module only
// carries the tag and its static classification.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Tag identifying one kind of configuration object.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeyType {
    /// The universal root. Has no instances of its own.
    Root,

    // ── VTN-independent (VIRTUAL scope) ──
    Flowlist,
    FlowlistEntry,
    PolicingProfile,
    PolicingProfileEntry,

    // ── VTN subtree ──
    Vtn,
    VtnFlowfilter,
    VtnFlowfilterEntry,
    VtnPolicingmap,

    Vbridge,
    VbrVlanmap,
    /// Port map discovered on import; only the import universe reaches it.
    VbrPortmap,
    VbrNwmonitor,
    VbrNwmonitorHost,
    VbrPolicingmap,
    VbrFlowfilter,
    VbrFlowfilterEntry,
    VbrIf,
    VbrIfFlowfilter,
    VbrIfFlowfilterEntry,
    VbrIfPolicingmap,

    Vrouter,
    VrtIproute,
    DhcprelayServer,
    DhcprelayIf,
    VrtIf,
    VrtIfFlowfilter,
    VrtIfFlowfilterEntry,

    Vterminal,
    VtermIf,
    VtermIfPolicingmap,
    VtermIfFlowfilter,
    VtermIfFlowfilterEntry,

    Vunknown,
    VunkIf,

    Vtep,
    VtepIf,
    VtepGrp,
    VtepGrpMember,

    Vtunnel,
    VtunnelIf,

    Vlink,
}

impl KeyType {
    /// Whether instances of this key type live under a named VTN.
    ///
    /// Decides visibility for VIRTUAL and VTN configuration modes.
    pub fn is_vtn_scoped(self) -> bool {
        !matches!(
            self,
            Self::Root
                | Self::Flowlist
                | Self::FlowlistEntry
                | Self::PolicingProfile
                | Self::PolicingProfileEntry
        )
    }

    /// Key types whose data exists only in the operational (STATE) view
    /// and therefore can never be imported from a controller.
    pub fn is_state_only(self) -> bool {
        matches!(self, Self::VbrNwmonitorHost)
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn display_and_parse_round_trip_names() {
        assert_eq!(KeyType::VbrIfFlowfilterEntry.to_string(), "vbr_if_flowfilter_entry");
        assert_eq!("vtn".parse::<KeyType>().unwrap(), KeyType::Vtn);
    }

    #[test]
    fn only_shared_policy_objects_are_vtn_independent() {
        let independent: Vec<KeyType> = KeyType::iter().filter(|kt| !kt.is_vtn_scoped()).collect();
        assert_eq!(
            independent,
            vec![
                KeyType::Root,
                KeyType::Flowlist,
                KeyType::FlowlistEntry,
                KeyType::PolicingProfile,
                KeyType::PolicingProfileEntry,
            ]
        );
    }
}
