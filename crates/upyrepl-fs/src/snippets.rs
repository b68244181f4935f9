//! Generated MicroPython source.
//!
//! Arguments are already-quoted literals (see [`crate::path`]); nothing here
//! quotes on its own. Transfers keep the open file in the device global `f`.

use crate::path::bytes_literal;

/// Print the listing as the `repr` of a list, so names survive verbatim.
pub(crate) fn list_dir(path: &str) -> String {
    format!("import os\nprint(repr(os.listdir({})))", path)
}

pub(crate) fn probe_dir(path: &str) -> String {
    format!("import os\nos.listdir({})", path)
}

pub(crate) fn stat(path: &str) -> String {
    format!("import os\nos.stat({})", path)
}

pub(crate) fn mkdir(path: &str) -> String {
    format!("import os\nos.mkdir({})", path)
}

pub(crate) fn rmdir(path: &str) -> String {
    format!("import os\nos.rmdir({})", path)
}

pub(crate) fn remove(path: &str) -> String {
    format!("import os\nos.remove({})", path)
}

pub(crate) fn rename(from: &str, to: &str) -> String {
    format!("import os\nos.rename({}, {})", from, to)
}

pub(crate) fn create_file(path: &str) -> String {
    format!("f = open({}, 'w')\nf.close()", path)
}

pub(crate) fn open_read(path: &str) -> String {
    format!("import ubinascii\nf = open({}, 'rb')", path)
}

pub(crate) fn open_write(path: &str) -> String {
    format!("f = open({}, 'wb')", path)
}

/// Print the next chunk as a base64 bytes literal, closing on failure.
pub(crate) fn read_chunk(chunk_size: usize) -> String {
    guarded(&format!("print(ubinascii.b2a_base64(f.read({})).strip())", chunk_size))
}

/// Write one block, closing on failure.
pub(crate) fn write_chunk(block: &[u8]) -> String {
    guarded(&format!("f.write({})", bytes_literal(block)))
}

pub(crate) fn close() -> &'static str {
    "f.close()"
}

pub(crate) fn reset() -> &'static str {
    "import machine\nmachine.reset()"
}

pub(crate) fn echo(message: &str) -> String {
    format!("print({})", message)
}

pub(crate) fn getcwd() -> &'static str {
    "import os\nprint(os.getcwd())"
}

pub(crate) fn exec_file(path: &str) -> String {
    format!("exec(open({}).read())", path)
}

fn guarded(statement: &str) -> String {
    format!(
        "try:\n    {}\nexcept Exception as e:\n    f.close()\n    raise e",
        statement
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_chunk_closes_before_reraising() {
        assert_eq!(
            read_chunk(64),
            "try:\n    print(ubinascii.b2a_base64(f.read(64)).strip())\nexcept Exception as e:\n    f.close()\n    raise e"
        );
    }

    #[test]
    fn test_write_chunk_embeds_hex_literal() {
        assert!(write_chunk(&[0x04, 0x27]).contains(r"f.write(b'\x04\x27')"));
    }

    #[test]
    fn test_reset_calls_machine_reset() {
        assert_eq!(reset(), "import machine\nmachine.reset()");
    }

    #[test]
    fn test_list_dir_prints_repr() {
        assert_eq!(list_dir("'/'"), "import os\nprint(repr(os.listdir('/')))");
    }
}
