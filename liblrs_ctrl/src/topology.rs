// A topology version maps every LED group onto the SiPM bias outputs it illuminates and the
// ADC64 inputs reading those SiPMs. One row per bias output:
// tpc, led_group, bias_module, bias_channel, bias_voltage, adc, adc_channel
// The bias output is the key. It is unique within a topology, so a repeated one is a
// validation error rather than an overwrite.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use fxhash::FxHashMap;

use super::channel_id::{AdcChannelId, BiasChannelId, LedGroupId};
use super::error::{TopologyError, ValidationError};

const ENTRIES_PER_LINE: usize = 7; //tpc, led_group, bias_module, bias_channel, bias_voltage, adc, adc_channel

#[derive(Debug, Clone, PartialEq)]
pub struct TopologyEntry {
    pub tpc: u16,
    pub led_group: LedGroupId,
    pub bias: BiasChannelId,
    pub bias_voltage: f64,
    pub adc: AdcChannelId,
}

/// One hardware topology version, loaded from its MOAS CSV file
#[derive(Debug, Clone, Default)]
pub struct Topology {
    entries: Vec<TopologyEntry>,
    bias_to_adc: FxHashMap<u32, AdcChannelId>,
}

impl Topology {
    /// Load a topology CSV. `bias_modules` is the number of bias modules the hardware has.
    pub fn load(path: &Path, bias_modules: u16) -> Result<Self, TopologyError> {
        let mut contents = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
        Self::parse(&contents, bias_modules)
    }

    pub fn parse(contents: &str, bias_modules: u16) -> Result<Self, TopologyError> {
        let mut topology = Topology::default();

        let mut lines = contents.lines().enumerate();
        lines.next(); // Skip the header
        for (index, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(",").map(|e| e.trim()).collect();
            if entries.len() != ENTRIES_PER_LINE {
                return Err(TopologyError::BadFileFormat(index + 1));
            }

            let led_group = LedGroupId(entries[1].parse()?);
            led_group.decode()?;
            let bias = BiasChannelId::new(entries[2].parse()?, entries[3].parse()?, bias_modules)?;
            let entry = TopologyEntry {
                tpc: entries[0].parse()?,
                led_group,
                bias,
                bias_voltage: entries[4].parse()?,
                adc: AdcChannelId {
                    adc: entries[5].parse()?,
                    channel: entries[6].parse()?,
                },
            };

            if topology.bias_to_adc.insert(bias.uuid(), entry.adc).is_some() {
                return Err(ValidationError::DuplicateBiasChannel(bias.module, bias.channel).into());
            }
            topology.entries.push(entry);
        }

        Ok(topology)
    }

    pub fn entries(&self) -> &[TopologyEntry] {
        &self.entries
    }

    /// Get the ADC input read out through a given bias output.
    ///
    /// If returns None the bias output is not part of this topology
    pub fn adc_channel(&self, bias: &BiasChannelId) -> Option<&AdcChannelId> {
        self.bias_to_adc.get(&bias.uuid())
    }

    /// Sorted, deduplicated LED groups of every TPC
    pub fn led_groups_by_tpc(&self) -> BTreeMap<u16, Vec<LedGroupId>> {
        let mut groups: BTreeMap<u16, Vec<LedGroupId>> = BTreeMap::new();
        for entry in self.entries.iter() {
            groups.entry(entry.tpc).or_default().push(entry.led_group);
        }
        for list in groups.values_mut() {
            list.sort();
            list.dedup();
        }
        groups
    }
}
