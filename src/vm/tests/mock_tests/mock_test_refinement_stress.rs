use std::sync::Arc;
use std::thread;

use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::mock_test_prelude::*;

const MUTATORS: usize = 16;
const CARDS_PER_MUTATOR: usize = 10_000;
const REGIONS_PER_MUTATOR: usize = 5;

/// Many mutators dirty disjoint cards while the refinement threads run. Nothing may be lost:
/// once everything is refined, every card is clean and recorded in the target's remembered set.
#[test]
pub fn concurrent_mutators_lose_no_card() {
    panic_after(120000, || {
        let flags = "-XX:G1ConcRefinementThreads=4 \
             -XX:G1ConcRefinementGreenZone=4 \
             -XX:G1ConcRefinementYellowZone=16 \
             -XX:G1ConcRefinementRedZone=32 \
             -XX:G1ConcRefinementThresholdStep=auto \
             -XX:G1UpdateBufferSize=64";
        let target_region = MUTATORS * REGIONS_PER_MUTATOR;
        let fixture = Arc::new(RefineFixture::create(flags, target_region + 1).start());

        let handles: Vec<_> = (0..MUTATORS)
            .map(|m| {
                let fixture = fixture.clone();
                thread::spawn(move || {
                    let cards_per_region = fixture.ctx.regions().geometry().cards_in_region();
                    let mut cards: Vec<Card> = (0..CARDS_PER_MUTATOR)
                        .map(|i| {
                            let region = m * REGIONS_PER_MUTATOR + i / cards_per_region;
                            fixture.card(region, i % cards_per_region)
                        })
                        .collect();
                    cards.shuffle(&mut rand::rngs::StdRng::seed_from_u64(m as u64));
                    let target = fixture.object_in(target_region);
                    let mut mutator = fixture.bind();
                    for card in cards {
                        fixture.write(&mut mutator, card, 0, target);
                    }
                    memory_manager::destroy_mutator(mutator);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ctx = &fixture.ctx;
        memory_manager::shutdown(ctx);
        assert_eq!(ctx.card_table().dirty_card_count(), 0);
        assert_eq!(ctx.dirty_card_queue_set().completed_buffers_num(), 0);
        assert_eq!(
            fixture.region(target_region).rem_set().occupied(),
            MUTATORS * CARDS_PER_MUTATOR
        );
        let refined = ctx.rem_set().conc_refine_cards();
        assert_eq!(refined, MUTATORS * CARDS_PER_MUTATOR);
        info!(
            "{} cards refined, {} buffers by mutators, {} by refinement threads",
            refined,
            ctx.dirty_card_queue_set().processed_buffers_mut(),
            ctx.dirty_card_queue_set().processed_buffers_rs_thread()
        );
    })
}
