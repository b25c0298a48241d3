use plclink_frame::{decode_incoming, decode_outgoing, COMMAND_SLOT};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_outgoing, print_telemetry, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex)?;
    if args.outgoing {
        let values = decode_outgoing(&bytes).map_err(|err| frame_error("decode failed", err))?;
        print_outgoing(&values, COMMAND_SLOT, format);
    } else {
        let frame = decode_incoming(&bytes).map_err(|err| frame_error("decode failed", err))?;
        print_telemetry(&frame, format);
    }
    Ok(SUCCESS)
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let cleaned: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '\n' | '\t'))
        .collect();
    hex::decode(&cleaned)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex input: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_are_ignored() {
        assert_eq!(parse_hex("0a:0B ff").unwrap(), vec![0x0a, 0x0b, 0xff]);
        assert_eq!(parse_hex("0x0102").unwrap(), vec![1, 2]);
    }

    #[test]
    fn bad_hex_is_data_invalid() {
        assert_eq!(parse_hex("abc").unwrap_err().code, DATA_INVALID);
        assert_eq!(parse_hex("zz").unwrap_err().code, DATA_INVALID);
    }
}
