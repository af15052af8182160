//! Plain-text task list, one task per line:
//!
//! ```text
//! # kind    name prio  lat       lon      geometry...          payloads
//! area      t01  false 41.18     -8.70    50 1000 30           sidescan
//! polygon   t02  false 41.181    -8.699   4 41.18 -8.70 ...    multibeam,camera
//! sample    t03  true  41.185    -8.71                         ctd
//! ```
//!
//! Area geometry is `width length bearing`; polygon geometry is the vertex
//! count followed by `lat lon` pairs. An empty payload set is written `-`.

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use crate::{
    payload::Payload,
    task::{SurveyArea, Task, TaskGeometry},
    Error, Location, Result,
};

pub fn load(path: impl AsRef<Path>) -> Result<Vec<Task>> {
    read_from(File::open(path)?)
}

pub fn save(path: impl AsRef<Path>, tasks: &[Task]) -> Result<()> {
    write_to(File::create(path)?, tasks)
}

pub fn read_from<R: Read>(reader: R) -> Result<Vec<Task>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .comment(Some(b'#'))
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut tasks = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let fields: Vec<&str> = record.iter().filter(|f| !f.is_empty()).collect();
        if fields.is_empty() {
            continue;
        }
        tasks.push(parse_task(&fields).map_err(|reason| Error::TaskList { line, reason })?);
    }
    Ok(tasks)
}

pub fn write_to<W: Write>(mut writer: W, tasks: &[Task]) -> Result<()> {
    writeln!(writer, "# mvplanner task list")?;
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .from_writer(writer);

    for task in tasks {
        let loc = task.location();
        let mut fields = vec![
            kind_name(&task.geometry).to_string(),
            task.name.clone(),
            task.priority.to_string(),
            loc.lat.to_string(),
            loc.lon.to_string(),
        ];
        match &task.geometry {
            TaskGeometry::Area(area) => {
                fields.push(area.width.to_string());
                fields.push(area.length.to_string());
                fields.push(area.bearing.to_string());
            }
            TaskGeometry::Polygon { vertices } => {
                fields.push(vertices.len().to_string());
                for v in vertices {
                    fields.push(v.lat.to_string());
                    fields.push(v.lon.to_string());
                }
            }
            TaskGeometry::Sample { .. } => {}
        }
        fields.push(if task.payloads.is_empty() {
            "-".to_string()
        } else {
            task.payloads.iter().map(|p| p.name()).collect::<Vec<_>>().join(",")
        });
        wtr.write_record(&fields)?;
    }
    wtr.flush()?;
    Ok(())
}

fn kind_name(geometry: &TaskGeometry) -> &'static str {
    match geometry {
        TaskGeometry::Area(_) => "area",
        TaskGeometry::Polygon { .. } => "polygon",
        TaskGeometry::Sample { .. } => "sample",
    }
}

fn parse_task(fields: &[&str]) -> std::result::Result<Task, String> {
    let num = |i: usize| -> std::result::Result<f64, String> {
        let f = fields.get(i).ok_or_else(|| format!("missing field {}", i + 1))?;
        f.parse::<f64>().map_err(|_| format!("bad number '{}'", f))
    };
    if fields.len() < 6 {
        return Err(format!("expected at least 6 fields, found {}", fields.len()));
    }

    let name = fields[1].to_string();
    let priority = fields[2]
        .parse::<bool>()
        .map_err(|_| format!("bad priority '{}'", fields[2]))?;
    let location = Location::new(num(3)?, num(4)?);

    let (geometry, next) = match fields[0] {
        "area" => (
            TaskGeometry::Area(SurveyArea {
                center: location,
                width: num(5)?,
                length: num(6)?,
                bearing: num(7)?,
            }),
            8,
        ),
        "polygon" => {
            let count = num(5)? as usize;
            let vertices = (0..count)
                .map(|i| -> std::result::Result<Location, String> {
                    Ok(Location::new(num(6 + 2 * i)?, num(7 + 2 * i)?))
                })
                .collect::<std::result::Result<Vec<_>, String>>()?;
            (TaskGeometry::Polygon { vertices }, 6 + 2 * count)
        }
        "sample" => (TaskGeometry::Sample { location }, 5),
        other => return Err(format!("unknown task kind '{}'", other)),
    };

    let payloads = match fields.get(next) {
        None | Some(&"-") => Vec::new(),
        Some(list) => list
            .split(',')
            .map(|p| p.parse::<Payload>().map_err(|e| e.to_string()))
            .collect::<std::result::Result<Vec<_>, String>>()?,
    };

    let mut task = Task::new(name, geometry).with_payloads(payloads);
    task.priority = priority;
    Ok(task)
}
