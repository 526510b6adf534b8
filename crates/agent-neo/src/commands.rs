/// What a line typed at the prompt asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// Nothing but whitespace.
    Empty,
    /// `quit` or `exit`.
    Quit,
    /// `clear`
    Clear,
    /// Anything else, trimmed, for the agent.
    Message(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            Command::Empty
        } else if line.eq_ignore_ascii_case("quit")
            || line.eq_ignore_ascii_case("exit")
        {
            Command::Quit
        } else if line.eq_ignore_ascii_case("clear") {
            Command::Clear
        } else {
            Command::Message(line)
        }
    }
}
