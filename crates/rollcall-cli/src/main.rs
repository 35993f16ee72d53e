use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use rollcall_core::config::{default_data_dir, default_model_dir};
use rollcall_core::report::{export_csv, school_days};
use rollcall_core::{
    check_orientation, AttendanceRecorder, CapturedImage, CheckInContext, EnrollRequest,
    Enrollment, FaceImageStore, OnnxEmbedder, Orientation, PersonName, PipelineConfig,
    Recognition, RecognitionOutcome,
};
use rollcall_store::{Database, FsImageStore, Student};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Rollcall attendance administration CLI")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "ROLLCALL_DB_PATH")]
    db: Option<PathBuf>,
    /// Directory holding reference face images
    #[arg(long, global = true, env = "ROLLCALL_FACE_DIR")]
    faces: Option<PathBuf>,
    /// Directory containing the ONNX models
    #[arg(long, global = true, env = "ROLLCALL_MODEL_DIR")]
    models: Option<PathBuf>,
    /// Pipeline tuning file (TOML)
    #[arg(long, global = true, env = "ROLLCALL_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and face directory
    Init,
    /// Manage the student roster
    #[command(subcommand)]
    Student(StudentCommand),
    /// Manage subjects
    #[command(subcommand)]
    Subject(SubjectCommand),
    /// Manage sections
    #[command(subcommand)]
    Section(SectionCommand),
    /// Manage rooms
    #[command(subcommand)]
    Room(RoomCommand),
    /// Schedule a section's subject in a room
    Schedule {
        #[arg(long)]
        section: i64,
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        room: i64,
        /// Daily start time (HH:MM)
        #[arg(long, value_parser = parse_time)]
        start: Option<NaiveTime>,
        /// Daily end time (HH:MM)
        #[arg(long, value_parser = parse_time)]
        end: Option<NaiveTime>,
    },
    /// Enroll students in a section's subject
    EnrollClass {
        #[arg(long)]
        section: i64,
        #[arg(long)]
        subject: i64,
        /// Student IDs
        #[arg(required = true)]
        students: Vec<String>,
    },
    /// Register a student's face from front, left and right images
    Register {
        /// Student ID
        id: String,
        /// First name (defaults to the roster entry)
        #[arg(long)]
        first: Option<String>,
        #[arg(long)]
        middle: Option<String>,
        /// Last name (defaults to the roster entry)
        #[arg(long)]
        last: Option<String>,
        front: PathBuf,
        left: PathBuf,
        right: PathBuf,
    },
    /// Recognize the face in an image and record attendance
    Recognize {
        image: PathBuf,
        #[arg(long)]
        room: i64,
        #[arg(long)]
        subject: i64,
    },
    /// Report the head orientation of the face in an image
    Check { image: PathBuf },
    /// Delete a student's registered face and reference images
    Unregister { id: String },
    /// Monthly attendance report
    Report {
        #[command(flatten)]
        month: MonthArgs,
        /// Emit CSV instead of a table
        #[arg(long)]
        csv: bool,
    },
    /// Seed Absent marks for every enrolled student and school day of a month
    Generate {
        #[command(flatten)]
        month: MonthArgs,
        /// Recorder ID written on the generated marks
        #[arg(long)]
        recorded_by: Option<i64>,
    },
    /// Delete a section's marks for a subject between two dates (inclusive)
    Clear {
        #[arg(long)]
        section: i64,
        #[arg(long)]
        subject: i64,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
    },
}

#[derive(Subcommand)]
enum StudentCommand {
    Add {
        id: String,
        #[arg(long)]
        first: String,
        #[arg(long)]
        middle: Option<String>,
        #[arg(long)]
        last: String,
    },
    List,
    Remove { id: String },
}

#[derive(Subcommand)]
enum SubjectCommand {
    Add { code: String, name: String },
    List,
}

#[derive(Subcommand)]
enum SectionCommand {
    Add { name: String },
    List,
}

#[derive(Subcommand)]
enum RoomCommand {
    Add { name: String },
    List,
}

#[derive(Args, Clone, Copy)]
struct MonthArgs {
    #[arg(long)]
    section: i64,
    #[arg(long)]
    subject: i64,
    #[arg(long)]
    year: i32,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    month: u32,
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| format!("expected HH:MM, got {s:?}"))
}

/// Resolved locations and tuning shared by every command.
struct Paths {
    db: PathBuf,
    faces: PathBuf,
    models: PathBuf,
    pipeline: PipelineConfig,
}

impl Paths {
    fn resolve(cli: &Cli) -> Result<Self> {
        let data_dir = default_data_dir();
        let pipeline = match &cli.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("loading pipeline config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        Ok(Self {
            db: cli.db.clone().unwrap_or_else(|| data_dir.join("rollcall.db")),
            faces: cli.faces.clone().unwrap_or_else(|| data_dir.join("faces")),
            models: cli.models.clone().unwrap_or_else(default_model_dir),
            pipeline,
        })
    }

    fn database(&self) -> Result<Database> {
        Database::open(&self.db).with_context(|| format!("opening database {}", self.db.display()))
    }

    fn images(&self) -> Result<FsImageStore> {
        FsImageStore::open(&self.faces)
            .with_context(|| format!("opening face directory {}", self.faces.display()))
    }

    fn embedder(&self) -> Result<OnnxEmbedder> {
        let embedder = OnnxEmbedder::new(&self.models, &self.pipeline);
        if !embedder.warm_up() {
            bail!(
                "face models could not be loaded from {} (see log for details)",
                self.models.display()
            );
        }
        Ok(embedder)
    }
}

fn load_image(path: &Path) -> Result<CapturedImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    CapturedImage::from_bytes(bytes).with_context(|| format!("decoding {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = Paths::resolve(&cli)?;
    tracing::debug!(db = %paths.db.display(), faces = %paths.faces.display(), "resolved paths");

    match cli.command {
        Commands::Init => {
            paths.database()?;
            paths.images()?;
            println!("Database:  {}", paths.db.display());
            println!("Faces:     {}", paths.faces.display());
            println!("Models:    {}", paths.models.display());
        }
        Commands::Student(command) => student(&paths.database()?, command)?,
        Commands::Subject(SubjectCommand::Add { code, name }) => {
            let id = paths.database()?.add_subject(&code, &name)?;
            println!("Subject {id}: {code} {name}");
        }
        Commands::Subject(SubjectCommand::List) => {
            for s in paths.database()?.list_subjects()? {
                println!("{:>4}  {:<10} {}", s.subject_id, s.code, s.name);
            }
        }
        Commands::Section(SectionCommand::Add { name }) => {
            let id = paths.database()?.add_section(&name)?;
            println!("Section {id}: {name}");
        }
        Commands::Section(SectionCommand::List) => {
            for s in paths.database()?.list_sections()? {
                println!("{:>4}  {}", s.section_id, s.name);
            }
        }
        Commands::Room(RoomCommand::Add { name }) => {
            let id = paths.database()?.add_room(&name)?;
            println!("Room {id}: {name}");
        }
        Commands::Room(RoomCommand::List) => {
            for r in paths.database()?.list_rooms()? {
                println!("{:>4}  {}", r.room_id, r.name);
            }
        }
        Commands::Schedule {
            section,
            subject,
            room,
            start,
            end,
        } => {
            paths
                .database()?
                .assign_schedule(section, subject, room, start, end)?;
            println!("Scheduled subject {subject} for section {section} in room {room}");
        }
        Commands::EnrollClass {
            section,
            subject,
            students,
        } => {
            let added = paths.database()?.enroll_students(section, subject, &students)?;
            println!("Enrolled {added} new student(s)");
        }
        Commands::Register {
            id,
            first,
            middle,
            last,
            front,
            left,
            right,
        } => {
            let db = paths.database()?;
            let images = paths.images()?;
            let captures = [front, left, right]
                .iter()
                .map(|p| load_image(p))
                .collect::<Result<Vec<_>>>()?;

            let roster_name = db.get_student(&id)?.map(|s| s.person_name());
            let name = match (first, last, roster_name) {
                (Some(first), Some(last), _) => PersonName { first, middle, last },
                (_, _, Some(name)) => name,
                _ => PersonName::new(String::new(), String::new()),
            };

            let embedder = paths.embedder()?;
            let outcome = Enrollment::new(&embedder, &db, &db, &images, &paths.pipeline).enroll(
                EnrollRequest {
                    person_id: id,
                    name,
                    images: captures,
                },
            )?;
            println!(
                "Registered {} with {} embeddings",
                outcome.person_id, outcome.embeddings
            );
        }
        Commands::Recognize {
            image,
            room,
            subject,
        } => {
            let db = paths.database()?;
            let probe = load_image(&image)?;
            let embedder = paths.embedder()?;
            let recorder = AttendanceRecorder::new(&db, &db, &paths.pipeline);
            let outcome = Recognition::new(&embedder, &db, &db, recorder, &paths.pipeline).recognize(
                &probe,
                CheckInContext {
                    room_id: room,
                    subject_id: subject,
                },
            );
            match &outcome {
                RecognitionOutcome::Matched {
                    person_id,
                    distance,
                    attendance,
                    ..
                } => {
                    println!("{} ({person_id}, distance {distance:.4})", outcome.message());
                    match attendance {
                        Some(event) => println!(
                            "Marked {} for section {} on {}",
                            event.status, event.section_id, event.date
                        ),
                        None => println!("Attendance could not be recorded (see log)"),
                    }
                }
                RecognitionOutcome::Unrecognized { best_distance } => match best_distance {
                    Some(d) => println!("{} (closest distance {d:.4})", outcome.message()),
                    None => println!("{}", outcome.message()),
                },
                RecognitionOutcome::NoFaceDetected => println!("{}", outcome.message()),
            }
        }
        Commands::Check { image } => {
            let capture = load_image(&image)?;
            let embedder = paths.embedder()?;
            match check_orientation(&embedder, &capture.gray, paths.pipeline.orientation_offset) {
                Some(Orientation::Front) => println!("front"),
                Some(Orientation::Left) => println!("left"),
                Some(Orientation::Right) => println!("right"),
                None => println!("No face detected"),
            }
        }
        Commands::Unregister { id } => {
            let db = paths.database()?;
            let images = paths.images()?;
            let had_descriptor = db.delete_descriptor(&id)?;
            let removed_images = images.remove_all(&id)?;
            if !had_descriptor && removed_images == 0 {
                bail!("no registered face for {id}");
            }
            println!("Removed face registration for {id} ({removed_images} image(s))");
        }
        Commands::Report { month, csv } => {
            let db = paths.database()?;
            let rows = db.monthly_records(month.section, month.subject, month.year, month.month)?;
            let days = school_days(month.year, month.month);
            if csv {
                println!("{}", export_csv(&rows, &days));
            } else {
                println!("{:<12} {:<28} {:>7} {:>6} {:>5} {:>5}", "ID", "Name", "Present", "Absent", "Total", "%");
                for row in &rows {
                    let stats = row.stats();
                    println!(
                        "{:<12} {:<28} {:>7} {:>6} {:>5} {:>4}%",
                        row.person_id, row.name, stats.present, stats.absent, stats.total, stats.percentage
                    );
                }
                let summary = db.statistics(month.section, month.subject, month.year, month.month)?;
                println!(
                    "\n{} student(s), {} day(s), {} record(s), {:.2}% present",
                    summary.total_students,
                    summary.total_days,
                    summary.total_records,
                    summary.attendance_percentage
                );
            }
        }
        Commands::Generate { month, recorded_by } => {
            let db = paths.database()?;
            if db.records_exist(month.section, month.subject, month.year, month.month)? {
                println!("Existing marks for {}-{:02} are kept", month.year, month.month);
            }
            let summary = db.generate_month(
                month.section,
                month.subject,
                month.year,
                month.month,
                recorded_by.unwrap_or(paths.pipeline.system_recorder_id),
            )?;
            println!(
                "Generated {} record(s) for {} student(s) across {} day(s)",
                summary.inserted, summary.students, summary.days
            );
        }
        Commands::Clear {
            section,
            subject,
            from,
            to,
        } => {
            if from > to {
                bail!("--from {from} is after --to {to}");
            }
            let removed = paths.database()?.delete_range(section, subject, from, to)?;
            println!("Deleted {removed} record(s)");
        }
    }

    Ok(())
}

fn student(db: &Database, command: StudentCommand) -> Result<()> {
    match command {
        StudentCommand::Add {
            id,
            first,
            middle,
            last,
        } => {
            let student = Student {
                student_id: id,
                first_name: first,
                middle_name: middle,
                last_name: last,
            };
            db.add_student(&student)?;
            println!("Added {} ({})", student.display_name(), student.student_id);
        }
        StudentCommand::List => {
            let students = db.list_students()?;
            if students.is_empty() {
                println!("No students");
            }
            for s in students {
                println!("{:<12} {}", s.student_id, s.display_name());
            }
        }
        StudentCommand::Remove { id } => {
            if !db.remove_student(&id)? {
                bail!("no student {id}");
            }
            println!("Removed {id}");
        }
    }
    Ok(())
}
