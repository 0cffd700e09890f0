use anyhow::{Context, Result, anyhow};
use geoguess_types::{City, CityDifficulty};
use rand::seq::SliceRandom;

const BUILTIN_CITIES: &str = "\
# name,country,lat,lng,difficulty
Paris,France,48.8566,2.3522,easy
London,United Kingdom,51.5074,-0.1278,easy
New York,United States,40.7128,-74.0060,easy
Tokyo,Japan,35.6762,139.6503,easy
Sydney,Australia,-33.8688,151.2093,easy
Rio de Janeiro,Brazil,-22.9068,-43.1729,easy
Cairo,Egypt,30.0444,31.2357,easy
Moscow,Russia,55.7558,37.6173,easy
Rome,Italy,41.9028,12.4964,easy
Beijing,China,39.9042,116.4074,easy
Los Angeles,United States,34.0522,-118.2437,easy
Mumbai,India,19.0760,72.8777,easy
Barcelona,Spain,41.3851,2.1734,medium
Cape Town,South Africa,-33.9249,18.4241,medium
Toronto,Canada,43.6532,-79.3832,medium
Buenos Aires,Argentina,-34.6037,-58.3816,medium
Istanbul,Turkey,41.0082,28.9784,medium
Bangkok,Thailand,13.7563,100.5018,medium
Nairobi,Kenya,-1.2921,36.8219,medium
Lima,Peru,-12.0464,-77.0428,medium
Stockholm,Sweden,59.3293,18.0686,medium
Seoul,South Korea,37.5665,126.9780,medium
Mexico City,Mexico,19.4326,-99.1332,medium
Auckland,New Zealand,-36.8485,174.7633,medium
Ulaanbaatar,Mongolia,47.8864,106.9057,hard
Tbilisi,Georgia,41.7151,44.8271,hard
Windhoek,Namibia,-22.5609,17.0658,hard
Asuncion,Paraguay,-25.2637,-57.5759,hard
Thimphu,Bhutan,27.4728,89.6390,hard
Reykjavik,Iceland,64.1466,-21.9426,hard
Hobart,Australia,-42.8821,147.3272,hard
Nuuk,Greenland,64.1814,-51.6941,hard
Almaty,Kazakhstan,43.2220,76.8512,hard
Antananarivo,Madagascar,-18.8792,47.5079,hard
Paramaribo,Suriname,5.8520,-55.2038,hard
Yakutsk,Russia,62.0355,129.6755,hard
";

/// Pool of target cities for rounds.
#[derive(Debug, Clone)]
pub struct CityCatalog {
    cities: Vec<City>,
}

impl CityCatalog {
    pub fn new(cities: Vec<City>) -> Self {
        Self { cities }
    }

    pub fn builtin() -> Self {
        // The embedded list is covered by tests, so parsing cannot fail here.
        Self::from_csv(BUILTIN_CITIES).unwrap_or_else(|_| Self::new(Vec::new()))
    }

    /// Parse `name,country,lat,lng,difficulty` lines. Blank lines and lines
    /// starting with `#` are ignored.
    pub fn from_csv(contents: &str) -> Result<Self> {
        let mut cities = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != 5 {
                return Err(anyhow!(
                    "line {}: expected 5 fields, found {}",
                    line_no + 1,
                    fields.len()
                ));
            }

            let lat: f64 = fields[2]
                .parse()
                .with_context(|| format!("line {}: invalid latitude", line_no + 1))?;
            let lng: f64 = fields[3]
                .parse()
                .with_context(|| format!("line {}: invalid longitude", line_no + 1))?;
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(anyhow!("line {}: coordinates out of range", line_no + 1));
            }
            let difficulty = CityDifficulty::parse(fields[4])
                .ok_or_else(|| anyhow!("line {}: unknown difficulty {}", line_no + 1, fields[4]))?;

            cities.push(City {
                name: fields[0].to_string(),
                country: fields[1].to_string(),
                lat,
                lng,
                difficulty,
            });
        }
        Ok(Self { cities })
    }

    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read city file {}", path.display()))?;
        Self::from_csv(&contents)
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn count_by_difficulty(&self, difficulty: CityDifficulty) -> usize {
        self.cities
            .iter()
            .filter(|c| c.difficulty == difficulty)
            .count()
    }

    /// Pick a random target city not in `used`. Prefers the requested tier,
    /// falls back to any unused city, and only repeats a city once the whole
    /// catalog has been played.
    pub fn pick(&self, difficulty: CityDifficulty, used: &[&City]) -> Option<City> {
        let is_unused = |city: &&City| {
            !used
                .iter()
                .any(|u| u.name == city.name && u.country == city.country)
        };
        let mut rng = rand::thread_rng();

        let preferred: Vec<&City> = self
            .cities
            .iter()
            .filter(|c| c.difficulty == difficulty)
            .filter(is_unused)
            .collect();
        if let Some(city) = preferred.choose(&mut rng) {
            return Some((*city).clone());
        }

        let unused: Vec<&City> = self.cities.iter().filter(is_unused).collect();
        if let Some(city) = unused.choose(&mut rng) {
            return Some((*city).clone());
        }

        self.cities.choose(&mut rng).cloned()
    }
}

impl Default for CityCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
