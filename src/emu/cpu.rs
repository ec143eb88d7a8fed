//! The Z80 as a bus-level device, one half-clock per tick.

use std::any::Any;

use super::clock::DeviceClock;
use super::device::{Device, DeviceState, DeviceType};
use super::microcode::{self, Addr, BusCycle, CpuState, Dst, MicroOp, Src, Then};
use super::name::Name;
use super::registers::{MachineCycle, RegisterFile, Step};
use super::signal::{SignalBus, SignalId, SignalState};
use crate::plat::Prefix;

/// Clock-event token: bump PC after an opcode fetch.
const PC_INCREMENT: u32 = 1;
/// RESET must be held for three full clocks.
const RESET_HALF_CLOCKS: u8 = 6;

/// What the current machine cycle is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// An M1 opcode fetch.
    Fetch,
    /// A micro-op popped from the pipeline.
    Op(MicroOp),
}

/// What happens to the step cursor after a half-clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    /// WAIT is asserted; repeat this half-clock.
    Stall,
    /// The machine cycle is over.
    Complete,
}

pub struct Z80 {
    name: Name,
    hz: Option<u64>,
    cpu: CpuState,
    phase: Phase,
    /// Half-clocks seen with RESET held, or `None` outside reset.
    reset_clocks: Option<u8>,
    bus_granted: bool,
    nmi_pending: bool,
    /// NMI was seen inactive since the last latch.
    nmi_armed: bool,
    /// IM 2 vector pointer from the last acknowledge.
    vector: u16,
}

impl Z80 {
    pub fn new(name: impl Into<Name>) -> Self {
        Self::blank(name.into(), None)
    }

    /// The half-clock rate. A 3.5 MHz part ticks at 7 MHz.
    pub fn with_frequency(mut self, hz: u64) -> Self {
        self.hz = Some(hz);
        self
    }

    fn blank(name: Name, hz: Option<u64>) -> Self {
        Self {
            name,
            hz,
            cpu: CpuState::default(),
            phase: Phase::Fetch,
            reset_clocks: None,
            bus_granted: false,
            nmi_pending: false,
            nmi_armed: true,
            vector: 0,
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.cpu.regs
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.cpu.regs
    }

    fn hold_reset(&mut self, bus: &mut SignalBus) {
        let clocks = match self.reset_clocks {
            Some(clocks) => clocks,
            None => {
                log::debug!("{}: RESET asserted", self.name);
                self.float_outputs(bus);
                0
            }
        };
        if clocks < RESET_HALF_CLOCKS {
            let clocks = clocks + 1;
            if clocks == RESET_HALF_CLOCKS {
                self.power_on_registers();
            }
            self.reset_clocks = Some(clocks);
        }
    }

    fn float_outputs(&mut self, bus: &mut SignalBus) {
        for id in [
            SignalId::M1,
            SignalId::Mreq,
            SignalId::Iorq,
            SignalId::Rd,
            SignalId::Wr,
            SignalId::Rfsh,
            SignalId::Halt,
            SignalId::BusAck,
        ] {
            bus.assert_line(id, false);
        }
        bus.release_address();
        bus.release_data();
    }

    fn power_on_registers(&mut self) {
        let regs = &mut self.cpu.regs;
        regs.iff1 = false;
        regs.iff2 = false;
        regs.im = 0;
        regs.pc = 0;
        regs.fetch_addr = 0;
        regs.sp = 0xFFFF;
        regs.af = 0xFFFF;
        regs.i = 0;
        regs.r = 0;
        regs.halted = false;
        regs.m_cycle = MachineCycle::M1;
        regs.step = Step::T1H1;
        self.cpu.pipeline.clear();
        self.cpu.prefix = Default::default();
        self.cpu.ei_pending = false;
        self.phase = Phase::Fetch;
        self.nmi_pending = false;
        self.bus_granted = false;
    }

    fn latch_nmi(&mut self, bus: &SignalBus) {
        if self.nmi_armed && bus.active(SignalId::Nmi) {
            self.nmi_pending = true;
            self.nmi_armed = false;
        } else if !bus.active(SignalId::Nmi) {
            self.nmi_armed = true;
        }
    }

    /// Returns true while the bus is handed over.
    fn bus_request(&mut self, bus: &mut SignalBus) -> bool {
        if bus.active(SignalId::BusRq) {
            if !self.bus_granted {
                log::debug!("{}: bus granted", self.name);
                self.bus_granted = true;
                bus.release_address();
                bus.release_data();
                for id in [SignalId::Mreq, SignalId::Iorq, SignalId::Rd, SignalId::Wr] {
                    bus.set(id, SignalState::HighImpedance);
                }
                bus.assert_line(SignalId::BusAck, true);
            }
            return true;
        }
        log::debug!("{}: bus released", self.name);
        self.bus_granted = false;
        for id in [SignalId::Mreq, SignalId::Iorq, SignalId::Rd, SignalId::Wr] {
            bus.assert_line(id, false);
        }
        bus.assert_line(SignalId::BusAck, false);
        false
    }

    fn leave_halt(&mut self, bus: &mut SignalBus) {
        if self.cpu.regs.halted {
            self.cpu.regs.halted = false;
            bus.assert_line(SignalId::Halt, false);
        }
    }

    fn accept_nmi(&mut self, bus: &mut SignalBus) {
        log::debug!("{}: NMI accepted at {:#06X}", self.name, self.cpu.regs.pc);
        self.nmi_pending = false;
        self.leave_halt(bus);
        microcode::nmi_response(&mut self.cpu);
        self.begin_queued();
    }

    fn accept_int(&mut self, bus: &mut SignalBus) {
        log::debug!(
            "{}: INT accepted at {:#06X} (IM {})",
            self.name,
            self.cpu.regs.pc,
            self.cpu.regs.im
        );
        self.leave_halt(bus);
        microcode::int_response(&mut self.cpu);
        self.begin_queued();
    }

    fn begin_queued(&mut self) {
        if let Some(op) = self.cpu.pipeline.pop() {
            log::trace!("> {:?}", op);
            self.phase = Phase::Op(op);
        }
    }

    fn next_cycle(&mut self) {
        self.cpu.regs.step = Step::T1H1;
        match self.cpu.pipeline.pop() {
            Some(op) => {
                log::trace!("> {:?}", op);
                self.phase = Phase::Op(op);
            }
            None => {
                self.phase = Phase::Fetch;
                self.cpu.regs.m_cycle = MachineCycle::M1;
            }
        }
    }

    fn half_clock(&mut self, clock: &mut DeviceClock<'_>, bus: &mut SignalBus) {
        let step = self.cpu.regs.step;
        let flow = match self.phase {
            Phase::Fetch => self.fetch(step, clock, bus),
            Phase::Op(op) => self.run_op(op, step, bus),
        };
        let regs = &mut self.cpu.regs;
        match flow {
            Flow::Stall => {}
            Flow::Next => regs.step = step.next(),
            Flow::Complete => {
                regs.step = Step::Done;
                regs.m_cycle = regs.m_cycle.next();
            }
        }
    }

    fn fetch(&mut self, step: Step, clock: &mut DeviceClock<'_>, bus: &mut SignalBus) -> Flow {
        let regs = &mut self.cpu.regs;
        match step {
            Step::T1H1 => {
                regs.fetch_addr = regs.pc;
                bus.set_address(regs.pc);
                bus.assert_line(SignalId::M1, true);
                if regs.halted {
                    bus.assert_line(SignalId::Halt, true);
                }
            }
            Step::T1H2 => {
                bus.assert_line(SignalId::Mreq, true);
                bus.assert_line(SignalId::Rd, true);
            }
            Step::T2H1 if bus.active(SignalId::Wait) => return Flow::Stall,
            Step::T3H1 => {
                regs.opcode = bus.data();
                bus.assert_line(SignalId::M1, false);
                bus.assert_line(SignalId::Mreq, false);
                bus.assert_line(SignalId::Rd, false);
                bus.assert_line(SignalId::Rfsh, true);
                clock.schedule_signal(4, SignalId::Rfsh, SignalState::High, "rfsh release");
                bus.set_address(regs.refresh_address());
            }
            Step::T3H2 => {
                bus.assert_line(SignalId::Mreq, true);
                regs.increment_r();
            }
            Step::T4H2 => {
                bus.assert_line(SignalId::Mreq, false);
                self.cpu.ei_pending = false;
                if !regs.halted {
                    clock.schedule_self(1, PC_INCREMENT, "pc increment");
                    let opcode = regs.opcode;
                    microcode::execute(opcode, &mut self.cpu);
                }
                return Flow::Complete;
            }
            _ => {}
        }
        Flow::Next
    }

    fn run_op(&mut self, op: MicroOp, step: Step, bus: &mut SignalBus) -> Flow {
        match op.cycle {
            BusCycle::MemRead { addr, dst } => match step {
                Step::T1H1 => {
                    let resolved = self.resolve(addr);
                    bus.set_address(resolved);
                }
                Step::T1H2 => {
                    bus.assert_line(SignalId::Mreq, true);
                    bus.assert_line(SignalId::Rd, true);
                }
                Step::T2H1 if bus.active(SignalId::Wait) => return Flow::Stall,
                Step::T3H1 => {
                    self.store(dst, bus.data());
                    bus.assert_line(SignalId::Mreq, false);
                    bus.assert_line(SignalId::Rd, false);
                }
                Step::T3H2 => {
                    if addr == Addr::Pc {
                        self.cpu.regs.pc = self.cpu.regs.pc.wrapping_add(1);
                    }
                    return self.finish(op.then);
                }
                _ => {}
            },
            BusCycle::MemWrite { addr, src } => match step {
                Step::T1H1 => {
                    let resolved = self.resolve(addr);
                    bus.set_address(resolved);
                }
                Step::T1H2 => {
                    bus.assert_line(SignalId::Mreq, true);
                    bus.set_data(self.load(src));
                }
                Step::T2H1 if bus.active(SignalId::Wait) => return Flow::Stall,
                Step::T2H2 => bus.assert_line(SignalId::Wr, true),
                Step::T3H2 => {
                    bus.assert_line(SignalId::Mreq, false);
                    bus.assert_line(SignalId::Wr, false);
                    bus.release_data();
                    return self.finish(op.then);
                }
                _ => {}
            },
            BusCycle::IoRead { dst } => match step {
                Step::T1H1 => bus.set_address(self.cpu.regs.wz),
                Step::T2H1 => {
                    bus.assert_line(SignalId::Iorq, true);
                    bus.assert_line(SignalId::Rd, true);
                }
                Step::T3H1 if bus.active(SignalId::Wait) => return Flow::Stall,
                Step::T4H1 => {
                    self.store(dst, bus.data());
                    bus.assert_line(SignalId::Iorq, false);
                    bus.assert_line(SignalId::Rd, false);
                }
                Step::T4H2 => return self.finish(op.then),
                _ => {}
            },
            BusCycle::IoWrite { src } => match step {
                Step::T1H1 => bus.set_address(self.cpu.regs.wz),
                Step::T1H2 => bus.set_data(self.load(src)),
                Step::T2H1 => {
                    bus.assert_line(SignalId::Iorq, true);
                    bus.assert_line(SignalId::Wr, true);
                }
                Step::T3H1 if bus.active(SignalId::Wait) => return Flow::Stall,
                Step::T4H1 => {
                    bus.assert_line(SignalId::Iorq, false);
                    bus.assert_line(SignalId::Wr, false);
                }
                Step::T4H2 => {
                    bus.release_data();
                    return self.finish(op.then);
                }
                _ => {}
            },
            BusCycle::InterruptAck => match step {
                Step::T1H1 => {
                    bus.set_address(self.cpu.regs.pc);
                    bus.assert_line(SignalId::M1, true);
                }
                Step::T3H1 => bus.assert_line(SignalId::Iorq, true),
                Step::T4H1 if bus.active(SignalId::Wait) => return Flow::Stall,
                Step::T5H1 => {
                    let byte = bus.data();
                    bus.assert_line(SignalId::M1, false);
                    bus.assert_line(SignalId::Iorq, false);
                    if let Some(vector) = microcode::interrupt_vector(&mut self.cpu, byte) {
                        self.vector = vector;
                    }
                }
                Step::T6H2 => return self.finish(op.then),
                _ => {}
            },
            BusCycle::Internal { half_clocks } => {
                if step.index() + 1 >= half_clocks {
                    return self.finish(op.then);
                }
            }
        }
        Flow::Next
    }

    fn resolve(&mut self, addr: Addr) -> u16 {
        let regs = &mut self.cpu.regs;
        match addr {
            Addr::Pc => regs.pc,
            Addr::Hl => regs.hl,
            Addr::Wz => regs.wz,
            Addr::PushSp => {
                regs.sp = regs.sp.wrapping_sub(1);
                regs.sp
            }
            Addr::PopSp => {
                let sp = regs.sp;
                regs.sp = sp.wrapping_add(1);
                sp
            }
            Addr::Vector(offset) => self.vector.wrapping_add(u16::from(offset)),
        }
    }

    fn store(&mut self, dst: Dst, value: u8) {
        let regs = &mut self.cpu.regs;
        match dst {
            Dst::Reg(r) => regs.set8(r, value),
            Dst::PairLo(rp) => {
                let pair = regs.pair_mut(rp);
                *pair = (*pair & 0xFF00) | u16::from(value);
            }
            Dst::PairHi(rp) => {
                let pair = regs.pair_mut(rp);
                *pair = (*pair & 0x00FF) | (u16::from(value) << 8);
            }
            Dst::Z => regs.wz = (regs.wz & 0xFF00) | u16::from(value),
            Dst::W => regs.wz = (regs.wz & 0x00FF) | (u16::from(value) << 8),
        }
    }

    fn load(&self, src: Src) -> u8 {
        let regs = &self.cpu.regs;
        match src {
            Src::Reg(r) => regs.get8(r),
            Src::PcHi => (regs.pc >> 8) as u8,
            Src::PcLo => regs.pc as u8,
        }
    }

    fn finish(&mut self, then: Then) -> Flow {
        match then {
            Then::Next => {}
            Then::JumpWz => self.cpu.regs.pc = self.cpu.regs.wz,
            Then::Jump(target) => {
                self.cpu.regs.wz = target;
                self.cpu.regs.pc = target;
            }
        }
        Flow::Complete
    }
}

impl Device for Z80 {
    fn name(&self) -> Name {
        self.name
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    fn frequency(&self) -> Option<u64> {
        self.hz
    }

    fn tick(&mut self, clock: &mut DeviceClock<'_>, bus: &mut SignalBus) {
        if bus.active(SignalId::Reset) {
            self.hold_reset(bus);
            return;
        }
        if let Some(clocks) = self.reset_clocks.take() {
            if clocks < RESET_HALF_CLOCKS {
                log::warn!("{}: RESET released after {clocks} half-clocks", self.name);
                self.power_on_registers();
            }
            log::debug!("{}: RESET released", self.name);
        }

        self.latch_nmi(bus);
        if self.cpu.regs.step == Step::Done {
            self.next_cycle();
        }

        let boundary = self.cpu.regs.step == Step::T1H1;
        if (self.bus_granted || (boundary && bus.active(SignalId::BusRq))) && self.bus_request(bus) {
            return;
        }

        // No interrupt splits a prefix from its opcode.
        if boundary && self.phase == Phase::Fetch && self.cpu.prefix == Prefix::None {
            if self.nmi_pending {
                self.accept_nmi(bus);
            } else if bus.active(SignalId::Int) && self.cpu.regs.iff1 && !self.cpu.ei_pending {
                self.accept_int(bus);
            }
        }

        self.half_clock(clock, bus);
    }

    fn reset(&mut self) {
        *self = Self::blank(self.name, self.hz);
    }

    fn on_clock_event(&mut self, token: u32, _bus: &mut SignalBus) {
        if token == PC_INCREMENT {
            self.cpu.regs.pc = self.cpu.regs.pc.wrapping_add(1);
        }
    }

    fn state(&self) -> DeviceState {
        DeviceState::Cpu(Box::new(self.cpu.regs))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::emu::board::BoardConfig;
    use crate::emu::memory::Memory;
    use crate::emu::timer::ManualClock;
    use crate::emu::worker::{BoardCore, ThreadRequest};

    fn board(program: &[(u16, &[u8])]) -> BoardCore {
        let config = BoardConfig::default()
            .with_frequency(7_000_000)
            .with_time_base(ManualClock::new());
        board_with(config, program)
    }

    fn board_with(config: BoardConfig, program: &[(u16, &[u8])]) -> BoardCore {
        let mut core = BoardCore::new(Name::new("cpu-test"), &config);
        let mut ram = Memory::ram("ram", 0x0000, 0x10000);
        for (addr, bytes) in program {
            for (i, byte) in bytes.iter().enumerate() {
                ram.poke(addr + i as u16, *byte);
            }
        }
        core.add_devices(vec![Box::new(Z80::new("z80")), Box::new(ram)]);
        core
    }

    fn regs(core: &mut BoardCore) -> RegisterFile {
        *core.device_mut::<Z80>("z80").unwrap().registers()
    }

    /// Steps until `done` holds, then lets the deferred PC increment land.
    fn run_until(core: &mut BoardCore, limit: usize, done: impl Fn(&RegisterFile) -> bool) {
        for _ in 0..limit {
            core.step();
            if done(&regs(core)) {
                for _ in 0..16 {
                    if core.clock().pending() == 0 {
                        return;
                    }
                    core.step();
                }
                panic!("clock events still pending after the condition held");
            }
        }
        panic!("condition not reached within {limit} steps");
    }

    fn run_until_halt(core: &mut BoardCore, limit: usize) {
        run_until(core, limit, |r| r.halted);
    }

    #[test]
    fn test_load_store_halt() {
        // LD A,42h / LD HL,8000h / LD (HL),A / HALT
        let mut core = board(&[(0, &[0x3E, 0x42, 0x21, 0x00, 0x80, 0x77, 0x76])]);
        run_until_halt(&mut core, 500);
        let r = regs(&mut core);
        assert_eq!(r.a(), 0x42);
        assert_eq!(r.hl, 0x8000);
        assert_eq!(r.pc, 0x0007);
        let ram = core.device_mut::<Memory>("ram").unwrap();
        assert_eq!(ram.peek(0x8000), Some(0x42));
    }

    #[test]
    fn test_halt_refetches_and_drives_halt_line() {
        let mut core = board(&[(0, &[0x76])]);
        run_until_halt(&mut core, 100);
        for _ in 0..64 {
            core.step();
        }
        assert!(core.bus().active(SignalId::Halt));
        let r = regs(&mut core);
        assert_eq!(r.pc, 1);
        assert_eq!(r.fetch_addr, 1);
    }

    #[test]
    fn test_call_and_ret() {
        // LD SP,9000h / CALL 0010h / HALT ; 0010h: LD A,7 / RET
        let mut core = board(&[
            (0x0000, &[0x31, 0x00, 0x90, 0xCD, 0x10, 0x00, 0x76]),
            (0x0010, &[0x3E, 0x07, 0xC9]),
        ]);
        run_until_halt(&mut core, 1000);
        let r = regs(&mut core);
        assert_eq!(r.a(), 7);
        assert_eq!(r.sp, 0x9000);
        assert_eq!(r.pc, 0x0007);
        let ram = core.device_mut::<Memory>("ram").unwrap();
        assert_eq!(ram.peek(0x8FFF), Some(0x00));
        assert_eq!(ram.peek(0x8FFE), Some(0x06));
    }

    #[test]
    fn test_jp_and_rst() {
        // JP 0020h ; 0020h: RST 28h ; 0028h: HALT
        let mut core = board(&[
            (0x0000, &[0xC3, 0x20, 0x00]),
            (0x0020, &[0xEF]),
            (0x0028, &[0x76]),
        ]);
        run_until_halt(&mut core, 1000);
        let r = regs(&mut core);
        assert_eq!(r.pc, 0x0029);
        assert_eq!(r.sp, 0xFFFE);
        let ram = core.device_mut::<Memory>("ram").unwrap();
        assert_eq!(ram.peek(0xFFFE), Some(0x21));
    }

    #[test]
    fn test_unknown_opcode_is_skipped() {
        let mut core = board(&[(0, &[0x18, 0x3E, 0x01, 0x76])]);
        run_until_halt(&mut core, 500);
        assert_eq!(regs(&mut core).a(), 1);
    }

    #[test]
    fn test_reset_sequence() {
        let time = ManualClock::new();
        let config = BoardConfig::default()
            .with_frequency(7_000_000)
            .with_time_base(time.clone());
        let mut core = board_with(config, &[(0, &[0x00; 16])]);
        {
            let cpu = core.device_mut::<Z80>("z80").unwrap();
            let r = cpu.registers_mut();
            r.pc = 0x1234;
            r.sp = 0x4000;
            r.af = 0x0102;
            r.iff1 = true;
            r.iff2 = true;
            r.im = 2;
        }
        core.handle(ThreadRequest::Reset);
        assert!(core.bus().active(SignalId::Reset));
        for _ in 0..20 {
            core.step();
        }
        let r = regs(&mut core);
        assert!(!r.iff1 && !r.iff2);
        assert_eq!((r.im, r.pc, r.fetch_addr), (0, 0, 0));
        assert_eq!((r.sp, r.af), (0xFFFF, 0xFFFF));
        assert!(core.bus().active(SignalId::Reset));

        time.advance(Duration::from_millis(2));
        core.step();
        assert!(!core.bus().active(SignalId::Reset));
        for _ in 0..40 {
            core.step();
        }
        assert!(regs(&mut core).pc > 0);
    }

    #[test]
    fn test_wait_stalls_fetch() {
        let mut core = board(&[(0, &[0x3E, 0x01, 0x76])]);
        core.bus_mut().assert_line(SignalId::Wait, true);
        for _ in 0..100 {
            core.step();
        }
        assert_eq!(regs(&mut core).step, Step::T2H1);
        core.bus_mut().assert_line(SignalId::Wait, false);
        run_until_halt(&mut core, 200);
        assert_eq!(regs(&mut core).a(), 1);
    }

    #[test]
    fn test_im1_interrupt_from_halt() {
        // IM 1 / EI / HALT ; 0038h: LD A,99h / HALT
        let mut core = board(&[(0x0000, &[0xED, 0x56, 0xFB, 0x76]), (0x0038, &[0x3E, 0x99, 0x76])]);
        run_until_halt(&mut core, 500);
        core.bus_mut().assert_line(SignalId::Int, true);
        run_until(&mut core, 500, |r| r.a() == 0x99 && r.halted);
        let r = regs(&mut core);
        assert_eq!(r.pc, 0x003B);
        assert!(!r.iff1);
        let ram = core.device_mut::<Memory>("ram").unwrap();
        assert_eq!(ram.peek(0xFFFE), Some(0x04));
    }

    #[test]
    fn test_im0_floating_bus_runs_rst_38() {
        // EI / HALT ; 0038h: LD A,44h / HALT. Nothing answers the acknowledge.
        let mut core = board(&[(0x0000, &[0xFB, 0x76]), (0x0038, &[0x3E, 0x44, 0x76])]);
        run_until_halt(&mut core, 500);
        assert_eq!(regs(&mut core).im, 0);
        core.bus_mut().assert_line(SignalId::Int, true);
        run_until(&mut core, 500, |r| r.a() == 0x44 && r.halted);
        let r = regs(&mut core);
        assert_eq!(r.pc, 0x003B);
        assert_eq!(r.sp, 0xFFFE);
        let ram = core.device_mut::<Memory>("ram").unwrap();
        assert_eq!(ram.peek(0xFFFE), Some(0x02));
    }

    #[test]
    fn test_im2_reads_vector_table() {
        // IM 2 / LD A,12h / LD I,A / EI / HALT
        // The floating bus supplies FFh, so the vector sits at 12FFh.
        let mut core = board(&[
            (0x0000, &[0xED, 0x5E, 0x3E, 0x12, 0xED, 0x47, 0xFB, 0x76]),
            (0x12FF, &[0x00, 0x20]),
            (0x2000, &[0x3E, 0x66, 0x76]),
        ]);
        run_until_halt(&mut core, 500);
        let r = regs(&mut core);
        assert_eq!((r.im, r.i), (2, 0x12));
        core.bus_mut().assert_line(SignalId::Int, true);
        run_until(&mut core, 500, |r| r.a() == 0x66 && r.halted);
        let r = regs(&mut core);
        assert_eq!(r.pc, 0x2003);
        assert!(!r.iff1);
        let ram = core.device_mut::<Memory>("ram").unwrap();
        assert_eq!(ram.peek(0xFFFE), Some(0x08));
        assert_eq!(ram.peek(0xFFFF), Some(0x00));
    }

    #[test]
    fn test_interrupt_waits_for_prefixed_opcode() {
        // IM 1 / EI / LD A,5 / LD I,A / HALT ; 0038h: LD A,99h / HALT
        let mut core = board(&[
            (0x0000, &[0xED, 0x56, 0xFB, 0x3E, 0x05, 0xED, 0x47, 0x76]),
            (0x0038, &[0x3E, 0x99, 0x76]),
        ]);
        // Stop right after the ED byte at 0005h has been fetched.
        for _ in 0..500 {
            core.step();
            let r = regs(&mut core);
            if r.fetch_addr == 0x0005 && r.step == Step::Done {
                break;
            }
        }
        let r = regs(&mut core);
        assert_eq!((r.fetch_addr, r.opcode, r.step), (0x0005, 0xED, Step::Done));
        core.bus_mut().assert_line(SignalId::Int, true);
        run_until(&mut core, 500, |r| r.halted);
        let r = regs(&mut core);
        assert_eq!(r.a(), 0x99);
        assert_eq!(r.i, 0x05);
        assert_eq!(r.pc, 0x003B);
        let ram = core.device_mut::<Memory>("ram").unwrap();
        assert_eq!(ram.peek(0xFFFE), Some(0x07));
    }

    #[test]
    fn test_nmi_jumps_to_0066() {
        let time = ManualClock::new();
        let config = BoardConfig::default()
            .with_frequency(7_000_000)
            .with_time_base(time.clone());
        // EI / HALT ; 0066h: LD A,55h / HALT
        let mut core = board_with(config, &[(0x0000, &[0xFB, 0x76]), (0x0066, &[0x3E, 0x55, 0x76])]);
        run_until_halt(&mut core, 500);
        core.handle(ThreadRequest::NonMaskableInterrupt);
        run_until(&mut core, 500, |r| r.a() == 0x55 && r.halted);
        let r = regs(&mut core);
        assert_eq!(r.pc, 0x0069);
        assert!(!r.iff1);
        assert!(r.iff2);
    }

    #[test]
    fn test_bus_request_floats_the_bus() {
        let mut core = board(&[(0, &[0x00; 8])]);
        core.bus_mut().assert_line(SignalId::BusRq, true);
        for _ in 0..10 {
            core.step();
        }
        assert!(core.bus().active(SignalId::BusAck));
        assert_eq!(core.bus().get(SignalId::Mreq), SignalState::HighImpedance);
        let pc = regs(&mut core).pc;
        core.bus_mut().assert_line(SignalId::BusRq, false);
        for _ in 0..20 {
            core.step();
        }
        assert!(!core.bus().active(SignalId::BusAck));
        assert!(regs(&mut core).pc > pc);
    }
}
