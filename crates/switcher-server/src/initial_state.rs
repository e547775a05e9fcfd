//! Initial-state dump source (C9).
//!
//! Builds the setup sequence dumped to a freshly established session,
//! directly from the command registry: version, product id, and a
//! snapshot of every configured mix-effect block's tally/program/preview
//! state, terminated by `InCm`. Each setup command is its own group, so the
//! session engine turns it into its own independently-ACKed packet rather
//! than bundling the whole dump into one.

use switcher_core::command::outbound;
use switcher_proto::Frame;
use switcher_state::StateStore;

/// Build the full initial-state dump as an ordered run of setup command
/// groups, one group per outbound packet.
#[must_use]
pub fn build(state: &StateStore) -> Vec<Vec<Frame>> {
    let mut groups = vec![vec![outbound::version()], vec![outbound::product_id(state)]];
    for me in state.me_indices() {
        groups.push(vec![outbound::tally_by_index(state, me)]);
        groups.push(vec![outbound::tally_by_source(state, me)]);
        groups.push(vec![outbound::program_input(state, me)]);
        groups.push(vec![outbound::preview_input(state, me)]);
    }
    groups.push(vec![outbound::init_complete()]);
    groups
}
