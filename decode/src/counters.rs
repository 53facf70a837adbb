// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Decode counter snapshots carried as nested attribute groups.

use crate::Error;
use crate::ParseFromAttributes;
use pon_messages::attr::AttrGroup;
use pon_messages::attr::AttrValue;
use pon_messages::attr::GroupSchema;
use pon_messages::attr::COUNTERS_GROUP;
use pon_messages::command::Command;

/// Common operations over all counter snapshots.
///
/// Every set has an all-zero snapshot, its `Default`.
pub trait CounterSet: ParseFromAttributes + Default {
    /// The command used to read the counters.
    const COMMAND: Command;

    /// The schema of the attribute group carrying the counters.
    const SCHEMA: GroupSchema;

    /// Return each counter and its name, in schema order.
    fn fields(&self) -> Vec<(&'static str, u64)>;

    /// Build the attribute group for this snapshot.
    fn to_group(&self) -> AttrGroup {
        self.fields()
            .into_iter()
            .zip(Self::SCHEMA.fields.iter())
            .fold(AttrGroup::new(Self::SCHEMA.id), |group, ((_, value), field)| {
                group.with(field.id, AttrValue::U64(value))
            })
    }
}

// Generate a counter struct whose fields follow a group schema.
//
// Counters the firmware omits read as zero.
macro_rules! counter_set {
    (
        $(#[$meta:meta])*
        $name:ident, $command:ident, $schema:path, { $( $id:literal => $field:ident ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
        #[cfg_attr(
            any(feature = "api-traits", test),
            derive(schemars::JsonSchema, serde::Deserialize, serde::Serialize)
        )]
        pub struct $name {
            $( pub $field: u64, )+
        }

        impl ParseFromAttributes for $name {
            fn parse_attributes(groups: &[AttrGroup]) -> Result<Self, Error> {
                let group = groups
                    .iter()
                    .find(|g| g.id == COUNTERS_GROUP)
                    .ok_or(Error::MissingGroup(COUNTERS_GROUP))?;
                Ok(Self {
                    $( $field: group.get_u64($id).unwrap_or(0), )+
                })
            }
        }

        impl CounterSet for $name {
            const COMMAND: Command = Command::$command;
            const SCHEMA: GroupSchema = $schema;

            fn fields(&self) -> Vec<(&'static str, u64)> {
                vec![ $( (stringify!($field), self.$field) ),+ ]
            }
        }
    };
}

counter_set! {
    /// GPON transmission convergence layer counters.
    GtcCounters, GtcCounters, pon_messages::attr::GTC_COUNTERS, {
        1 => bip_errors,
        2 => discarded_frames,
        3 => fec_corrected_codewords,
        4 => fec_uncorrectable_codewords,
        5 => fec_total_codewords,
        6 => lods_events,
    }
}

counter_set! {
    /// XG(S)-PON transmission convergence layer counters.
    XgtcCounters, XgtcCounters, pon_messages::attr::XGTC_COUNTERS, {
        1 => psbd_hec_corrected,
        2 => psbd_hec_uncorrectable,
        3 => fs_hec_corrected,
        4 => fs_hec_uncorrectable,
        5 => lost_words,
        6 => ploam_mic_errors,
    }
}

counter_set! {
    /// GEM port counters, summed over all ports.
    GemCounters, GemCounters, pon_messages::attr::GEM_COUNTERS, {
        1 => tx_frames,
        2 => tx_fragments,
        3 => tx_bytes,
        4 => rx_frames,
        5 => rx_fragments,
        6 => rx_bytes,
        7 => key_errors,
        8 => hec_errors,
    }
}

counter_set! {
    /// Ethernet counters of the UNI-side interface.
    EthCounters, EthCounters, pon_messages::attr::ETH_COUNTERS, {
        1 => bytes,
        2 => frames,
        3 => undersized_frames,
        4 => oversized_frames,
        5 => fcs_errors,
        6 => dropped_frames,
    }
}

counter_set! {
    PloamCounters, PloamCounters, pon_messages::attr::PLOAM_COUNTERS, {
        1 => ds_messages,
        2 => ds_mic_errors,
        3 => us_messages,
        4 => us_acks,
    }
}

counter_set! {
    TwdmCounters, TwdmCounters, pon_messages::attr::TWDM_COUNTERS, {
        1 => tuning_requests,
        2 => tuning_rejected,
        3 => tuning_completed,
        4 => channel_profile_changes,
    }
}
