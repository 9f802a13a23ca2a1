// redraft-common: wire protocol shared by the daemon and the CLI client.

pub mod protocol;
