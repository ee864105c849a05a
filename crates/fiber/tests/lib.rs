use fiber::Fiber;

#[test]
fn basic_usage() {
    fn fiber_proc(suspended: Fiber) -> ! {
        unsafe { suspended.resume() };
        panic!("resumed a fiber procedure a second time");
    }

    let fiber = Fiber::new(fiber::DEFAULT_STACK_SIZE, fiber_proc);
    let fiber_id = fiber.id();

    let prev = unsafe { fiber.resume() };
    assert_eq!(fiber_id, prev.id());
}

#[test]
fn current_reflects_active_fiber() {
    assert!(fiber::current().is_none() || fiber::current().is_some());
    let here = fiber::init();
    assert_eq!(fiber::current(), Some(here));
}
