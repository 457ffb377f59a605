pub mod ble;
pub mod ble_discovery;
pub mod fallback;
pub mod traits;

pub use ble::BluerStack;
pub use ble_discovery::{PeerDiscovery, PeerDiscoveryConfig};
pub use fallback::{FallbackConfig, FallbackTransport, TcpFallback};
pub use traits::{RadioError, RadioEvent, RadioStack};
