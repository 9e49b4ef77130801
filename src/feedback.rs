use std::io::Write;

/// Short cue played when a code is decoded.
pub trait Feedback {
    fn pulse(&mut self);
}

/// Rings the terminal bell on stderr.
pub struct Bell;

impl Feedback for Bell {
    fn pulse(&mut self) {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}

pub struct Silent;

impl Feedback for Silent {
    fn pulse(&mut self) {}
}

pub fn from_config(quiet: bool) -> Box<dyn Feedback> {
    if quiet {
        Box::new(Silent)
    } else {
        Box::new(Bell)
    }
}
