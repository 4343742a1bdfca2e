// Bounded record/replay: a ring of the last MAX_REPLAY_LENGTH (pc, value)
// pairs. On division by zero the recorded tail is undone backwards and then
// redone forwards with disassembly switched on.

use crate::processor::{Console, Machine};
use crate::RuntimeError;
use termion::color;

pub const MAX_REPLAY_LENGTH: u32 = 100;

pub struct Replay {
    pub tc: u32,
    pcs: [u32; MAX_REPLAY_LENGTH as usize],
    values: [u32; MAX_REPLAY_LENGTH as usize],
}

impl Replay {
    pub fn new() -> Replay {
        Replay {
            tc: 0,
            pcs: [0; MAX_REPLAY_LENGTH as usize],
            values: [0; MAX_REPLAY_LENGTH as usize],
        }
    }

    pub fn record_state(&mut self, pc: u32, value: u32) {
        self.pcs[(self.tc % MAX_REPLAY_LENGTH) as usize] = pc;
        self.values[(self.tc % MAX_REPLAY_LENGTH) as usize] = value;

        self.tc += 1;
    }

    pub fn pc_at(&self) -> u32 {
        self.pcs[(self.tc % MAX_REPLAY_LENGTH) as usize]
    }

    pub fn value(&self) -> u32 {
        self.values[(self.tc % MAX_REPLAY_LENGTH) as usize]
    }

    pub fn set_value(&mut self, value: u32) {
        self.values[(self.tc % MAX_REPLAY_LENGTH) as usize] = value;
    }
}

impl Machine {
    pub fn print_replay_banner(&mut self, message: &str) {
        // color only when writing to a real console
        if matches!(self.console, Console::Stdout) {
            let banner = format!(
                "{}{}{}\n",
                color::Fg(color::Red),
                message,
                color::Fg(color::Reset)
            );

            self.console_print(&banner);
        } else {
            self.console_print(message);
            self.console_print("\n");
        }
    }

    pub fn replay_trace(&mut self) -> Result<(), RuntimeError> {
        let trace_length = self.replay.tc.min(MAX_REPLAY_LENGTH);

        self.record = false;
        self.undo = true;

        // undo trace_length number of instructions
        let mut tl = trace_length;

        while tl > 0 {
            self.replay.tc -= 1;

            self.pc = self.replay.pc_at();

            self.fetch()?;
            self.decode_execute()?;

            tl -= 1;
        }

        self.undo = false;
        self.redo = true;

        self.disassemble = true;

        // redo trace_length number of instructions
        let mut tl = trace_length;

        while tl > 0 {
            // assert: pc == recorded pc at the current replay counter

            self.fetch()?;
            self.decode_execute()?;

            self.replay.tc += 1;

            tl -= 1;
        }

        self.disassemble = false;

        self.redo = false;
        self.record = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_ring_keeps_the_most_recent_tail() {
        let mut replay = Replay::new();

        for i in 0..250u32 {
            replay.record_state(i * 4, i);
        }

        assert_eq!(replay.tc, 250);

        // the counter now points at the slot holding entry 150
        replay.tc -= MAX_REPLAY_LENGTH;

        assert_eq!(replay.value(), 150);
        assert_eq!(replay.pc_at(), 600);
    }
}
