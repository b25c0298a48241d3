use plclink_frame::{clamp_u16, to_unsigned_int16, OutgoingValues, COMMAND_SLOT, OUTGOING_SLOTS};

use crate::cmd::EncodeArgs;
use crate::exit::{CliError, CliResult, SUCCESS};
use crate::output::{print_outgoing, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let values = to_wire(&args.values, args.signed)?;
    print_outgoing(&values, COMMAND_SLOT, format);
    Ok(SUCCESS)
}

fn to_wire(raw: &[i64], signed: bool) -> CliResult<OutgoingValues> {
    if raw.len() != OUTGOING_SLOTS {
        return Err(CliError::usage(format!(
            "expected {OUTGOING_SLOTS} values, got {}",
            raw.len()
        )));
    }
    let convert: fn(i64) -> u16 = if signed { to_unsigned_int16 } else { clamp_u16 };
    Ok(std::array::from_fn(|slot| convert(raw[slot])))
}
