// Remote stdout/stderr ends up in log lines and error messages. Strip anything a
// terminal would interpret and keep it to a bounded, single-line summary.
const MAX_CHARS: usize = 2048;

#[derive(Clone, Copy)]
enum State {
    Text,
    Escape,
    // ESC [ ... final byte
    Csi,
    // ESC ] ... BEL or ESC \
    Osc,
    OscEscape,
}

pub fn sanitize_remote_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_CHARS));
    let mut state = State::Text;
    let mut count = 0usize;
    let mut pending_break = false;

    for c in input.chars() {
        state = match state {
            State::Escape => match c {
                '[' => State::Csi,
                ']' => State::Osc,
                _ => State::Text,
            },
            State::Csi => {
                if ('@'..='~').contains(&c) {
                    State::Text
                } else {
                    State::Csi
                }
            }
            State::Osc => match c {
                '\x07' => State::Text,
                '\x1b' => State::OscEscape,
                _ => State::Osc,
            },
            State::OscEscape => match c {
                '\\' => State::Text,
                _ => State::Osc,
            },
            State::Text => {
                if c == '\x1b' {
                    State::Escape
                } else if c == '\n' || c == '\r' {
                    pending_break = !out.is_empty();
                    State::Text
                } else if c == '\t' || !(c.is_control() || is_bidi_control(c)) {
                    if pending_break {
                        out.push_str(" | ");
                        pending_break = false;
                    }
                    out.push(if c == '\t' { ' ' } else { c });
                    count += 1;
                    if count >= MAX_CHARS {
                        out.push_str(" ...[truncated]");
                        return out;
                    }
                    State::Text
                } else {
                    State::Text
                }
            }
        };
    }

    out.trim_end().to_string()
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
