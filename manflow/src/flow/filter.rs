//! Selection of the flows the running host participates in.

use super::ResolvedFlow;

/// Indices into `flows` of every enabled flow, in their original order.
///
/// Indices rather than copies are returned so per-flow runtime state can be
/// kept alongside and still be joined back to the flow it describes.
#[must_use]
pub fn enabled(flows: &[ResolvedFlow]) -> Vec<usize> {
    flows
        .iter()
        .enumerate()
        .filter_map(|(index, flow)| flow.is_enabled().then_some(index))
        .collect()
}

#[cfg(test)]
mod test {
    use std::num::NonZeroU32;

    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::flow::{Template, expand, seed};

    fn hops() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec(prop_oneof!["A", "B", "C", "D"], 0..4)
    }

    proptest! {
        #[test]
        fn only_flows_on_path_are_selected(paths in proptest::collection::vec(hops(), 1..16)) {
            let templates: Vec<Template> = paths
                .into_iter()
                .map(|hops| Template { dst_port: "1,2".to_string(), hops, ..Template::default() })
                .collect();
            let flows = seed(
                expand(&templates).unwrap(),
                &mut StdRng::seed_from_u64(1),
                "B",
                NonZeroU32::new(60).unwrap(),
            );

            let selected = enabled(&flows);
            let expected = flows.iter().filter(|f| f.hops.iter().any(|h| h == "B")).count();
            prop_assert_eq!(selected.len(), expected);
            prop_assert!(selected.windows(2).all(|w| w[0] < w[1]));
            for index in selected {
                prop_assert_eq!(flows[index].hops[flows[index].host_index.unwrap()].as_str(), "B");
            }
        }
    }
}
