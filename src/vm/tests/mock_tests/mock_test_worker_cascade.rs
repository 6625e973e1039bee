use super::mock_test_prelude::*;

// green 2, yellow 4, red 20, step 1: worker 0 runs from 3 buffers, worker 1 from 4.
const CASCADE_FLAGS: &str = "-XX:G1ConcRefinementRedZone=20 -XX:G1ConcRSLogCacheSize=0";

#[test]
pub fn workers_drain_the_backlog_down_to_the_green_zone() {
    panic_after(30000, || {
        let fixture = RefineFixture::create(CASCADE_FLAGS, 4).start();
        let ctx = &fixture.ctx;
        let cg1r = ctx.concurrent_refine();
        let dcqs = ctx.dirty_card_queue_set();
        assert_eq!(cg1r.thread(0).threshold(), 2);
        assert_eq!(cg1r.thread(1).threshold(), 3);
        assert_eq!(dcqs.process_completed_threshold(), 3);

        // Hold the workers back until the whole backlog is queued.
        ctx.suspendible_thread_set().synchronize();
        let mut mutator = fixture.bind();
        for n in 0..48 {
            fixture.write(&mut mutator, fixture.card(1, n), 0, fixture.object_in(2));
        }
        memory_manager::flush_mutator(&mut mutator);
        assert_eq!(dcqs.completed_buffers_num(), 12);
        assert!(dcqs.process_completed_buffers());
        ctx.suspendible_thread_set().desynchronize();

        wait_until(10000, || dcqs.processed_buffers_rs_thread() == 10);
        assert_eq!(dcqs.completed_buffers_num(), 2);
        wait_until(10000, || fixture.region(2).rem_set().occupied() == 40);
        wait_until(10000, || cg1r.thread(1).activations() >= 1);
        wait_until(10000, || !cg1r.thread(1).is_active(dcqs));
        // Nothing is refined below the green zone.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(dcqs.completed_buffers_num(), 2);

        cg1r.print_worker_threads(dcqs);
        memory_manager::destroy_mutator(mutator);
        memory_manager::shutdown(ctx);
        assert_eq!(fixture.region(2).rem_set().occupied(), 48);
        assert_eq!(ctx.card_table().dirty_card_count(), 0);
    })
}

#[test]
pub fn workers_stay_idle_in_the_green_zone() {
    panic_after(30000, || {
        let fixture = RefineFixture::create(CASCADE_FLAGS, 4).start();
        let ctx = &fixture.ctx;
        let dcqs = ctx.dirty_card_queue_set();
        let mut mutator = fixture.bind();
        for n in 0..8 {
            fixture.write(&mut mutator, fixture.card(1, n), 0, fixture.object_in(2));
        }
        memory_manager::flush_mutator(&mut mutator);
        assert_eq!(dcqs.completed_buffers_num(), 2);

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(dcqs.completed_buffers_num(), 2);
        assert_eq!(dcqs.processed_buffers_rs_thread(), 0);
        assert_eq!(ctx.concurrent_refine().thread(0).activations(), 0);

        memory_manager::destroy_mutator(mutator);
        memory_manager::shutdown(ctx);
    })
}

// green 0, yellow 10, red 20, step 5: worker 0 runs from 1 buffer, worker 1 above 5.
const WIDE_ZONE_FLAGS: &str = "-XX:G1ConcRefinementThreads=2 -XX:G1ConcRefinementGreenZone=0 \
    -XX:G1ConcRefinementYellowZone=10 -XX:G1ConcRefinementRedZone=20 \
    -XX:G1ConcRefinementThresholdStep=5 -XX:G1UpdateBufferSize=1 -XX:G1ConcRSLogCacheSize=0";

fn queue_cards(fixture: &RefineFixture, count: usize) {
    let ctx = &fixture.ctx;
    ctx.suspendible_thread_set().synchronize();
    let mut mutator = fixture.bind();
    for n in 0..count {
        fixture.write(&mut mutator, fixture.card(1, n), 0, fixture.object_in(2));
    }
    memory_manager::flush_mutator(&mut mutator);
    assert_eq!(ctx.dirty_card_queue_set().completed_buffers_num(), count);
    memory_manager::destroy_mutator(mutator);
    ctx.suspendible_thread_set().desynchronize();
}

#[test]
pub fn s1_light_backlog_wakes_only_worker_0() {
    panic_after(30000, || {
        let fixture = RefineFixture::create(WIDE_ZONE_FLAGS, 4).start();
        let ctx = &fixture.ctx;
        let cg1r = ctx.concurrent_refine();
        let dcqs = ctx.dirty_card_queue_set();
        assert_eq!(cg1r.thread(0).threshold(), 0);
        assert_eq!(cg1r.thread(1).threshold(), 5);
        assert_eq!(cg1r.thread(1).deactivation_threshold(), 0);
        assert_eq!(dcqs.process_completed_threshold(), 1);

        queue_cards(&fixture, 3);
        wait_until(10000, || dcqs.processed_buffers_rs_thread() == 3);
        assert_eq!(dcqs.completed_buffers_num(), 0);
        wait_until(10000, || !cg1r.thread(0).is_active(dcqs));
        assert!(cg1r.thread(0).activations() >= 1);
        assert_eq!(cg1r.thread(1).activations(), 0);
        assert_eq!(fixture.region(2).rem_set().occupied(), 3);

        memory_manager::shutdown(ctx);
        assert_eq!(ctx.card_table().dirty_card_count(), 0);
    })
}

#[test]
pub fn s2_burst_wakes_both_workers() {
    panic_after(30000, || {
        let fixture = RefineFixture::create(WIDE_ZONE_FLAGS, 4).start();
        let ctx = &fixture.ctx;
        let cg1r = ctx.concurrent_refine();
        let dcqs = ctx.dirty_card_queue_set();

        queue_cards(&fixture, 12);
        wait_until(10000, || dcqs.processed_buffers_rs_thread() == 12);
        assert_eq!(dcqs.completed_buffers_num(), 0);
        wait_until(10000, || cg1r.thread(1).activations() >= 1);
        wait_until(10000, || !cg1r.thread(1).is_active(dcqs));
        assert!(cg1r.thread(0).activations() >= 1);
        assert_eq!(dcqs.processed_buffers_mut(), 0);
        assert_eq!(fixture.region(2).rem_set().occupied(), 12);

        memory_manager::shutdown(ctx);
        assert_eq!(ctx.card_table().dirty_card_count(), 0);
    })
}
