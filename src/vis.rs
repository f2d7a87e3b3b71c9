//! Debug visualization: dumps the sequence of accepted shrink steps as a
//! standalone HTML file, one table per recording. Enabled by the
//! `debugvis` config flag; the output format is informal and only meant
//! for eyeballing how a buffer collapsed.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::data::RecordedBits;

pub(crate) fn write_html(name: &str, steps: &[RecordedBits]) -> io::Result<()> {
    let path = format!("vis-{}.html", name);
    let mut f = BufWriter::new(File::create(path)?);

    writeln!(f, "<!DOCTYPE html>")?;
    writeln!(f, "<html><head><meta charset=\"utf-8\">")?;
    writeln!(f, "<title>shrink trace: {}</title>", name)?;
    writeln!(
        f,
        "<style>body{{font-family:monospace}}td,th{{border:1px solid #999;padding:2px 6px}}\
         table{{border-collapse:collapse;margin-bottom:1em}}</style>"
    )?;
    writeln!(f, "</head><body>")?;
    writeln!(f, "<h1>shrink trace: {}</h1>", name)?;

    for (i, rec) in steps.iter().enumerate() {
        writeln!(
            f,
            "<h2>step {}: {} blocks, {} groups</h2>",
            i,
            rec.data.len(),
            rec.groups.len()
        )?;
        writeln!(f, "<table><tr>")?;
        for b in &rec.data {
            writeln!(f, "<td>{:#x}</td>", b)?;
        }
        writeln!(f, "</tr></table>")?;
        writeln!(f, "<ul>")?;
        for g in &rec.groups {
            writeln!(
                f,
                "<li>{} [{}, {}){}</li>",
                g.label,
                g.begin,
                g.end.map_or_else(|| "?".to_string(), |e| e.to_string()),
                if g.removable { " removable" } else { "" }
            )?;
        }
        writeln!(f, "</ul>")?;
    }

    writeln!(f, "</body></html>")?;
    f.flush()
}
