//! Entry points a network module exports through its entry vector.
//!
//! Each slot of the vector holds a ROM-relative offset to an ordinary function
//! compiled for the target's C calling convention. Every function takes at
//! most three word-sized arguments and returns one word:
//!
//! | entry | arguments | returns |
//! |---|---|---|
//! | `create` | `out_network`, `config` | error word |
//! | `init` | `network`, `params` | bool |
//! | `init_v2` | `network`, `weights[]`, `activations[]` | bool |
//! | `run` | `network`, `input`, `output` | batches |
//! | `report` | `network`, `out_report` | bool |
//! | `error` | `network` | error word |
//! | `destroy` | `network` | network (null on success) |
//! | `forward` | `network`, `input` | batches |
//! | `observer_register` | `network`, `observer_slot` | bool |
//! | `observer_unregister` | `network`, `observer_slot` | bool |
//! | `observer_node_info` | `network`, `node_info` | bool |

pub const ENTRY_COUNT: usize = 11;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Entry {
    Create = 0,
    Init,
    InitV2,
    Run,
    Report,
    Error,
    Destroy,
    Forward,
    ObserverRegister,
    ObserverUnregister,
    ObserverNodeInfo,
}

impl Entry {
    pub const ALL: [Entry; ENTRY_COUNT] = [
        Entry::Create,
        Entry::Init,
        Entry::InitV2,
        Entry::Run,
        Entry::Report,
        Entry::Error,
        Entry::Destroy,
        Entry::Forward,
        Entry::ObserverRegister,
        Entry::ObserverUnregister,
        Entry::ObserverNodeInfo,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Byte offset of this slot within the image header
    pub const fn header_offset(self) -> usize {
        crate::image::ENTRIES_OFFSET + (self as usize) * 4
    }

    /// A module cannot be installed without these
    pub const fn is_required(self) -> bool {
        matches!(
            self,
            Entry::Create | Entry::InitV2 | Entry::Run | Entry::Error | Entry::Destroy
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            Entry::Create => "create",
            Entry::Init => "init",
            Entry::InitV2 => "init_v2",
            Entry::Run => "run",
            Entry::Report => "report",
            Entry::Error => "error",
            Entry::Destroy => "destroy",
            Entry::Forward => "forward",
            Entry::ObserverRegister => "observer_register",
            Entry::ObserverUnregister => "observer_unregister",
            Entry::ObserverNodeInfo => "observer_node_info",
        }
    }
}
